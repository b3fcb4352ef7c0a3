// SSH 客户端 Handler 实现
// 实现 russh::client::Handler trait，服务器公钥交给 HostTrustStore 验证

use std::future::Future;
use std::sync::Arc;

use russh::keys::PublicKey;

use super::error::SshError;
use crate::trust::{host_pattern, HostKey, HostTrustStore};

/// 带主机公钥验证的 SSH 客户端 Handler
/// 公钥绑定到逻辑主机名（而不是 overlay 地址）
pub struct TrustedHostHandler {
    store: Arc<HostTrustStore>,
    /// known_hosts 中的主机写法
    host: String,
}

impl TrustedHostHandler {
    pub fn new(store: Arc<HostTrustStore>, hostname: &str, port: u16) -> Self {
        Self {
            store,
            host: host_pattern(hostname, port),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// 转换为 known_hosts 使用的算法名与 wire 格式数据
pub fn host_key(key: &PublicKey) -> Result<HostKey, SshError> {
    Ok(HostKey::new(key.algorithm().as_str(), key.to_bytes()?))
}

impl russh::client::Handler for TrustedHostHandler {
    type Error = SshError;

    /// 检查服务器公钥
    /// 验证失败时返回错误而不是 false，保留不一致/拒绝的具体原因
    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let store = self.store.clone();
        let host = self.host.clone();
        let presented = host_key(server_public_key);

        tracing::debug!(
            "[SSH] Server key for {}: {}",
            host,
            server_public_key.fingerprint(russh::keys::ssh_key::HashAlg::Sha256)
        );

        async move {
            let presented = presented?;
            store.verify(&host, &presented).await?;
            Ok(true)
        }
    }
}
