// 连接解析
// 偏好 -> 选择 backend -> 解析主机名 -> 地址
// 主机公钥验证以 Handler 的形式交给下游 SSH 传输

use std::sync::Arc;

use tracing::info;

use crate::backend::{BackendResult, Detector, ProbeContext};
use crate::ssh::TrustedHostHandler;
use crate::trust::HostTrustStore;

/// 解析结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// 逻辑主机名
    pub hostname: String,
    /// 可达地址
    pub address: String,
    /// 选中的 backend 名称
    pub backend: String,
}

impl ResolvedTarget {
    /// 该目标的主机公钥验证 Handler（绑定逻辑主机名）
    pub fn handler(&self, resolver: &ConnectionResolver, port: u16) -> TrustedHostHandler {
        TrustedHostHandler::new(resolver.trust.clone(), &self.hostname, port)
    }
}

/// 连接解析器
pub struct ConnectionResolver {
    detector: Detector,
    trust: Arc<HostTrustStore>,
}

impl ConnectionResolver {
    pub fn new(detector: Detector, trust: Arc<HostTrustStore>) -> Self {
        Self { detector, trust }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn trust_store(&self) -> &Arc<HostTrustStore> {
        &self.trust
    }

    /// 按偏好选择 backend 并解析主机名
    pub async fn resolve(
        &self,
        ctx: &ProbeContext,
        hostname: &str,
        preference: &str,
    ) -> BackendResult<ResolvedTarget> {
        let backend = self.detector.select_by_name(ctx, preference).await?;
        let address = self
            .detector
            .resolve_host(ctx, backend.as_ref(), hostname)
            .await?;

        info!(
            "[Resolver] {} -> {} via {}",
            hostname,
            address,
            backend.name()
        );
        Ok(ResolvedTarget {
            hostname: hostname.to_string(),
            address,
            backend: backend.name().to_string(),
        })
    }
}
