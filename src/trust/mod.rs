// 主机信任模块
//
// 模块结构:
// - error: 错误类型 (TrustError)
// - fingerprint: 公钥与指纹 (HostKey, Fingerprint)
// - known_hosts: known_hosts 行格式
// - store: 信任存储 (HostTrustStore)
// - policy: 首次连接策略
// - audit: 审计日志

pub mod audit;
pub mod error;
pub mod fingerprint;
pub mod known_hosts;
pub mod policy;
pub mod store;

pub use audit::{AuditEvent, AuditLog, AuditRecord};
pub use error::{TrustError, TrustResult};
pub use fingerprint::{Fingerprint, HostKey};
pub use known_hosts::{host_pattern, KnownHostEntry};
pub use policy::{AcceptNew, Decision, FirstContact, FirstContactPolicy, RejectUnknown, TerminalPrompt};
pub use store::{HostTrustStore, Verdict};
