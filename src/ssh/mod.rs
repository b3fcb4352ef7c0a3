// SSH 接入模块
//
// 模块结构:
// - error: 错误类型 (SshError)
// - handler: russh Handler 实现，服务器公钥交给 HostTrustStore 验证
//
// SSH 传输本身由 russh 完成

pub mod error;
pub mod handler;

pub use error::SshError;
pub use handler::{host_key, TrustedHostHandler};
