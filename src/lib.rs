// meshhop - 跨网络覆盖层的主机解析与 SSH 主机公钥信任
//
// 模块结构:
// - backend: 网络覆盖层探测、选择与主机名解析
// - trust: known_hosts 信任存储（TOFU）
// - ssh: russh Handler 接入
// - resolver: 连接解析
// - config: 本地配置

pub mod backend;
pub mod config;
pub mod resolver;
pub mod ssh;
pub mod trust;

pub use backend::{Backend, BackendError, Detector, ProbeContext, Registry, Status};
pub use resolver::{ConnectionResolver, ResolvedTarget};
pub use ssh::{SshError, TrustedHostHandler};
pub use trust::{Fingerprint, HostKey, HostTrustStore, TrustError};
