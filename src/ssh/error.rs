// SSH 错误类型定义

use thiserror::Error;

use crate::trust::TrustError;

/// SSH 错误类型
#[derive(Debug, Error)]
pub enum SshError {
    /// SSH 协议错误
    #[error("SSH protocol error: {0}")]
    Protocol(String),

    /// 密钥错误
    #[error("Key error: {0}")]
    Key(String),

    /// 主机公钥验证失败
    #[error(transparent)]
    HostKey(#[from] TrustError),
}

impl SshError {
    /// 是否为主机公钥不一致
    pub fn is_host_key_mismatch(&self) -> bool {
        matches!(self, SshError::HostKey(e) if e.is_mismatch())
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        SshError::Protocol(e.to_string())
    }
}

impl From<russh::keys::ssh_key::Error> for SshError {
    fn from(e: russh::keys::ssh_key::Error) -> Self {
        SshError::Key(e.to_string())
    }
}
