// 主机信任错误类型定义

use std::path::PathBuf;

use thiserror::Error;

use super::fingerprint::Fingerprint;

pub type TrustResult<T> = Result<T, TrustError>;

/// 主机信任错误
#[derive(Debug, Error)]
pub enum TrustError {
    /// 已信任的公钥与服务器出示的不一致（可能遭到中间人攻击）
    /// 包括同一主机换了另一种算法的公钥
    #[error(
        "{}",
        mismatch_warning(.host, .stored_algorithm, .stored, .presented_algorithm, .presented)
    )]
    HostKeyMismatch {
        host: String,
        stored_algorithm: String,
        stored: Fingerprint,
        presented_algorithm: String,
        presented: Fingerprint,
    },

    /// 服务器出示的公钥已被 @revoked 标记吊销
    #[error("Host key for {host} is revoked: {algorithm} {fingerprint}")]
    HostKeyRevoked {
        host: String,
        algorithm: String,
        fingerprint: Fingerprint,
    },

    /// 首次连接被拒绝
    #[error("Host key verification failed: {host} was not accepted")]
    HostKeyRejected { host: String },

    /// 同一 (主机, 算法) 已存在不同的公钥
    #[error("known_hosts already holds a different {algorithm} key for {host} (line {line})")]
    Conflict {
        host: String,
        algorithm: String,
        line: usize,
    },

    /// known_hosts 文件无法读写
    #[error("Known hosts store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 公钥数据无效
    #[error("Invalid host key: {0}")]
    InvalidKey(String),

    /// 首次连接确认失败
    #[error("Host key prompt failed: {0}")]
    Prompt(String),
}

impl TrustError {
    pub(crate) fn store(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TrustError::Store {
            path: path.into(),
            source,
        }
    }

    /// 是否为公钥不一致（需要人工处理，不能自动恢复）
    pub fn is_mismatch(&self) -> bool {
        matches!(self, TrustError::HostKeyMismatch { .. })
    }
}

fn mismatch_warning(
    host: &str,
    stored_algorithm: &str,
    stored: &Fingerprint,
    presented_algorithm: &str,
    presented: &Fingerprint,
) -> String {
    format!(
        "WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED for {host}!\n\
         IT IS POSSIBLE THAT SOMEONE IS DOING SOMETHING NASTY!\n\
         Someone could be eavesdropping on you right now (man-in-the-middle attack)!\n\
         Stored {stored_algorithm} key fingerprint:    {stored}\n\
         Presented {presented_algorithm} key fingerprint: {presented}\n\
         Contact the host administrator, then remove the old key with `meshhop known-hosts remove {host}`."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_shows_both_fingerprints() {
        let stored = Fingerprint::of(b"old");
        let presented = Fingerprint::of(b"new");
        let err = TrustError::HostKeyMismatch {
            host: "db1".to_string(),
            stored_algorithm: "ssh-ed25519".to_string(),
            stored: stored.clone(),
            presented_algorithm: "ssh-ed25519".to_string(),
            presented: presented.clone(),
        };
        let text = err.to_string();
        assert!(text.contains("REMOTE HOST IDENTIFICATION HAS CHANGED"));
        assert!(text.contains(&stored.to_string()));
        assert!(text.contains(&presented.to_string()));
        assert!(err.is_mismatch());
    }

    #[test]
    fn test_mismatch_message_names_both_key_types() {
        let err = TrustError::HostKeyMismatch {
            host: "db1".to_string(),
            stored_algorithm: "ssh-ed25519".to_string(),
            stored: Fingerprint::of(b"old"),
            presented_algorithm: "ssh-rsa".to_string(),
            presented: Fingerprint::of(b"new"),
        };
        let text = err.to_string();
        assert!(text.contains("Stored ssh-ed25519 key fingerprint"));
        assert!(text.contains("Presented ssh-rsa key fingerprint"));
    }

    #[test]
    fn test_rejected_is_not_mismatch() {
        let err = TrustError::HostKeyRejected {
            host: "db1".to_string(),
        };
        assert!(!err.is_mismatch());
    }
}
