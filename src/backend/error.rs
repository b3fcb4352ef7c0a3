// Backend 错误类型定义

use std::fmt;

use thiserror::Error;

/// Backend 操作结果
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend 错误类型
#[derive(Debug, Error)]
pub enum BackendError {
    /// 客户端程序未安装
    #[error("backend '{0}' not available")]
    NotAvailable(String),

    /// 覆盖网络未加入/未认证
    #[error("backend '{0}' not connected")]
    NotConnected(String),

    /// 主机名在该网络中找不到
    #[error("peer '{hostname}' not found via {backend}")]
    PeerNotFound { backend: String, hostname: String },

    /// 外部命令失败（启动失败或非零退出）
    #[error("backend command failed: {program}: {reason}")]
    CommandFailed { program: String, reason: String },

    /// 命令输出无法解析
    #[error("failed to parse {backend} status: {reason}")]
    Parse { backend: String, reason: String },

    /// 未注册的 backend 名称
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// 显式指定的 backend 未安装
    #[error("backend '{0}' is not available (not installed)")]
    BackendUnavailable(String),

    /// 所有 backend 都不可用
    #[error("no available backends found ({})", ProbeFailures(.0))]
    NoBackendAvailable(Vec<ProbeFailure>),

    /// 操作被取消
    #[error("operation cancelled")]
    Cancelled,

    /// 操作超时
    #[error("operation timed out")]
    Timeout,

    /// DNS 解析等 IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// 是否为上下文取消/超时
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

/// 单个 backend 被淘汰的原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeFailure {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

struct ProbeFailures<'a>(&'a [ProbeFailure]);

impl fmt::Display for ProbeFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("no backends registered");
        }
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}
