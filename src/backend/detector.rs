// Backend 自动探测与选择
//
// 选择策略：
// 1. 丢弃未安装的 backend
// 2. 已连接的优先，取优先级最高者
// 3. 都未连接时取已安装中优先级最高者
// 4. 同优先级按注册表顺序（名称排序）取第一个

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::context::ProbeContext;
use super::error::{BackendError, BackendResult, ProbeFailure};
use super::lan::{self, LanBackend};
use super::registry::Registry;
use super::{Backend, Status, AUTO};

/// 单个 backend 的探测结果
#[derive(Clone, Copy, Debug, Default)]
struct Probe {
    available: bool,
    connected: bool,
}

/// 健康检查结果
#[derive(Clone, Debug)]
pub struct HealthCheckResult {
    pub backend: String,
    pub available: bool,
    pub connected: bool,
    pub message: String,
    pub duration: Duration,
}

/// Backend 探测器
pub struct Detector {
    registry: Registry,
    /// overlay 解析失败时用于回退的 LAN/DNS backend
    fallback: Arc<dyn Backend>,
}

impl Detector {
    pub fn new(registry: Registry) -> Self {
        let fallback = registry
            .get(lan::NAME)
            .unwrap_or_else(|_| Arc::new(LanBackend::default()) as Arc<dyn Backend>);
        Self { registry, fallback }
    }

    /// 替换 LAN 回退 backend
    pub fn with_fallback(mut self, fallback: Arc<dyn Backend>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 并发探测所有 backend，按策略选出最佳者
    pub async fn select_best(&self, ctx: &ProbeContext) -> BackendResult<Arc<dyn Backend>> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let backends = self.registry.list();
        if backends.is_empty() {
            return Err(BackendError::NoBackendAvailable(Vec::new()));
        }

        let (tx, mut rx) = mpsc::channel::<(usize, Probe)>(backends.len());
        // JoinSet 被丢弃时中止所有未完成的探测任务
        let mut tasks = JoinSet::new();
        for (order, backend) in backends.iter().enumerate() {
            let backend = backend.clone();
            let tx = tx.clone();
            let probe_ctx = ctx.child();
            tasks.spawn(async move {
                let probe = probe_backend(backend.as_ref(), &probe_ctx).await;
                let _ = tx.send((order, probe)).await;
            });
        }
        drop(tx);

        let mut probes: Vec<Option<Probe>> = vec![None; backends.len()];
        let mut received = 0;
        while received < backends.len() {
            tokio::select! {
                biased;
                err = ctx.done() => {
                    warn!("[Detector] Discovery interrupted: {}", err);
                    return Err(err);
                }
                msg = rx.recv() => match msg {
                    Some((order, probe)) => {
                        debug!(
                            "[Detector] {} available={} connected={}",
                            backends[order].name(),
                            probe.available,
                            probe.connected
                        );
                        probes[order] = Some(probe);
                        received += 1;
                    }
                    // 所有发送端都已关闭（任务 panic）
                    None => break,
                },
            }
        }

        let pick = |want_connected: bool| {
            let mut best: Option<usize> = None;
            for (order, probe) in probes.iter().enumerate() {
                let Some(probe) = probe else { continue };
                if !probe.available || (want_connected && !probe.connected) {
                    continue;
                }
                let better = match best {
                    Some(b) => backends[order].priority() > backends[b].priority(),
                    None => true,
                };
                if better {
                    best = Some(order);
                }
            }
            best
        };

        if let Some(order) = pick(true) {
            info!(
                "[Detector] Selected connected backend {}",
                backends[order].name()
            );
            return Ok(backends[order].clone());
        }
        if let Some(order) = pick(false) {
            info!(
                "[Detector] No connected backend, selected available backend {}",
                backends[order].name()
            );
            return Ok(backends[order].clone());
        }

        let failures = backends
            .iter()
            .zip(probes.iter())
            .map(|(backend, probe)| ProbeFailure {
                backend: backend.name().to_string(),
                reason: match probe {
                    Some(_) => "not installed".to_string(),
                    None => "probe did not complete".to_string(),
                },
            })
            .collect();
        Err(BackendError::NoBackendAvailable(failures))
    }

    /// 按偏好选择 backend；"auto" 或空字符串时自动探测
    /// 显式指定时只要求已安装，不要求已连接
    pub async fn select_by_name(
        &self,
        ctx: &ProbeContext,
        preference: &str,
    ) -> BackendResult<Arc<dyn Backend>> {
        if preference.is_empty() || preference == AUTO {
            return self.select_best(ctx).await;
        }

        let backend = self.registry.get(preference)?;
        if !backend.is_available(ctx).await {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            return Err(BackendError::BackendUnavailable(preference.to_string()));
        }

        debug!("[Detector] Using requested backend {}", preference);
        Ok(backend)
    }

    /// 通过 backend 解析主机名；overlay 解析失败时尝试 LAN/DNS
    /// 回退也失败时返回 overlay 的原始错误
    pub async fn resolve_host(
        &self,
        ctx: &ProbeContext,
        backend: &dyn Backend,
        hostname: &str,
    ) -> BackendResult<String> {
        let err = match backend.peer_address(ctx, hostname).await {
            Ok(address) => {
                debug!(
                    "[Detector] {} resolved {} -> {}",
                    backend.name(),
                    hostname,
                    address
                );
                return Ok(address);
            }
            Err(err) => err,
        };

        if err.is_cancellation() || backend.name() == lan::NAME {
            return Err(err);
        }

        match self.fallback.peer_address(ctx, hostname).await {
            Ok(address) => {
                info!(
                    "[Detector] {} could not resolve {} ({}), using LAN address {}",
                    backend.name(),
                    hostname,
                    err,
                    address
                );
                Ok(address)
            }
            Err(lan_err) => {
                debug!(
                    "[Detector] LAN fallback for {} failed: {}",
                    hostname, lan_err
                );
                Err(err)
            }
        }
    }

    /// 所有 backend 的状态
    pub async fn detect_all(&self, ctx: &ProbeContext) -> BTreeMap<String, Status> {
        let statuses = join_all(
            self.registry
                .list()
                .iter()
                .map(|backend| status_or_placeholder(backend.as_ref(), ctx)),
        )
        .await;

        statuses
            .into_iter()
            .map(|status| (status.backend.clone(), status))
            .collect()
    }

    /// 指定 backend 的状态
    pub async fn detect_by_name(&self, ctx: &ProbeContext, name: &str) -> BackendResult<Status> {
        let backend = self.registry.get(name)?;
        if !backend.is_available(ctx).await {
            return Ok(Status::new(name, false, "Not installed"));
        }
        backend.status(ctx).await
    }

    /// 健康检查（诊断用，不参与选择）
    pub async fn health_check(&self, ctx: &ProbeContext) -> Vec<HealthCheckResult> {
        join_all(
            self.registry
                .list()
                .iter()
                .map(|backend| check_backend(backend.as_ref(), ctx)),
        )
        .await
    }
}

async fn probe_backend(backend: &dyn Backend, ctx: &ProbeContext) -> Probe {
    let available = backend.is_available(ctx).await;
    let connected = available && backend.is_connected(ctx).await;
    Probe {
        available,
        connected,
    }
}

async fn status_or_placeholder(backend: &dyn Backend, ctx: &ProbeContext) -> Status {
    if !backend.is_available(ctx).await {
        return Status::new(backend.name(), false, "Not installed");
    }
    match backend.status(ctx).await {
        Ok(status) => status,
        Err(e) => Status::new(backend.name(), false, e.to_string()),
    }
}

async fn check_backend(backend: &dyn Backend, ctx: &ProbeContext) -> HealthCheckResult {
    let start = Instant::now();
    let mut result = HealthCheckResult {
        backend: backend.name().to_string(),
        available: backend.is_available(ctx).await,
        connected: false,
        message: String::new(),
        duration: Duration::ZERO,
    };

    if !result.available {
        result.message = "Not installed".to_string();
    } else {
        result.connected = backend.is_connected(ctx).await;
        result.message = match backend.status(ctx).await {
            Ok(status) => status.message,
            Err(e) => e.to_string(),
        };
    }

    result.duration = start.elapsed();
    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 测试用 backend
    pub(crate) struct MockBackend {
        name: String,
        priority: i32,
        available: bool,
        connected: bool,
        address: Option<String>,
        delay: Duration,
        probes: AtomicUsize,
    }

    impl MockBackend {
        pub(crate) fn new(name: &str, priority: i32) -> Self {
            Self {
                name: name.to_string(),
                priority,
                available: true,
                connected: true,
                address: Some("192.168.1.1".to_string()),
                delay: Duration::ZERO,
                probes: AtomicUsize::new(0),
            }
        }

        pub(crate) fn available(mut self, available: bool) -> Self {
            self.available = available;
            self
        }

        pub(crate) fn connected(mut self, connected: bool) -> Self {
            self.connected = connected;
            self
        }

        pub(crate) fn address(mut self, address: Option<&str>) -> Self {
            self.address = address.map(str::to_string);
            self
        }

        pub(crate) fn delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub(crate) fn probe_count(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }

        async fn wait(&self, ctx: &ProbeContext) -> BackendResult<()> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            ctx.run(async move {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn is_available(&self, ctx: &ProbeContext) -> bool {
            self.wait(ctx).await.is_ok() && self.available
        }

        async fn is_connected(&self, ctx: &ProbeContext) -> bool {
            self.wait(ctx).await.is_ok() && self.connected
        }

        async fn status(&self, ctx: &ProbeContext) -> BackendResult<Status> {
            self.wait(ctx).await?;
            Ok(Status::new(&self.name, self.connected, "Mock status"))
        }

        async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
            self.wait(ctx).await?;
            if !self.connected {
                return Err(BackendError::NotConnected(self.name.clone()));
            }
            self.address
                .clone()
                .ok_or_else(|| BackendError::PeerNotFound {
                    backend: self.name.clone(),
                    hostname: hostname.to_string(),
                })
        }
    }

    fn detector(backends: Vec<MockBackend>) -> Detector {
        let mut registry = Registry::new();
        for backend in backends {
            registry.register(Arc::new(backend));
        }
        Detector::new(registry)
    }

    #[tokio::test]
    async fn test_selects_highest_priority_connected() {
        let d = detector(vec![
            MockBackend::new("low", 10),
            MockBackend::new("high", 50),
            MockBackend::new("medium", 30),
        ]);
        let best = d.select_best(&ProbeContext::new()).await.unwrap();
        assert_eq!(best.name(), "high");
    }

    #[tokio::test]
    async fn test_ignores_unavailable() {
        let d = detector(vec![
            MockBackend::new("unavailable", 100).available(false),
            MockBackend::new("available", 10),
        ]);
        let best = d.select_best(&ProbeContext::new()).await.unwrap();
        assert_eq!(best.name(), "available");
    }

    #[tokio::test]
    async fn test_highest_available_when_none_connected() {
        let d = detector(vec![
            MockBackend::new("low", 10).connected(false),
            MockBackend::new("high", 50).connected(false),
        ]);
        let best = d.select_best(&ProbeContext::new()).await.unwrap();
        assert_eq!(best.name(), "high");
    }

    #[tokio::test]
    async fn test_connected_beats_higher_priority_available() {
        let d = detector(vec![
            MockBackend::new("low", 10),
            MockBackend::new("mid", 30).connected(false),
            MockBackend::new("high", 50).available(false),
        ]);
        let best = d.select_best(&ProbeContext::new()).await.unwrap();
        assert_eq!(best.name(), "low");
    }

    #[tokio::test]
    async fn test_none_available_reports_every_backend() {
        let d = detector(vec![
            MockBackend::new("a", 10).available(false),
            MockBackend::new("b", 20).available(false),
        ]);
        match d.select_best(&ProbeContext::new()).await {
            Err(BackendError::NoBackendAvailable(failures)) => {
                let names: Vec<_> = failures.iter().map(|f| f.backend.as_str()).collect();
                assert_eq!(names, vec!["a", "b"]);
                assert!(failures.iter().all(|f| f.reason == "not installed"));
            }
            other => panic!("unexpected result: {:?}", other.map(|b| b.name().to_string())),
        }
    }

    #[tokio::test]
    async fn test_tie_break_follows_registry_order() {
        for round in 0..20u64 {
            // 让排在前面的 backend 有时更晚完成
            let (alpha_delay, beta_delay) = if round % 2 == 0 { (5, 0) } else { (0, 5) };
            let d = detector(vec![
                MockBackend::new("beta", 40).delay(Duration::from_millis(beta_delay)),
                MockBackend::new("alpha", 40).delay(Duration::from_millis(alpha_delay)),
            ]);
            let best = d.select_best(&ProbeContext::new()).await.unwrap();
            assert_eq!(best.name(), "alpha");
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let d = detector(vec![
            MockBackend::new("slow", 10).delay(Duration::from_secs(30)),
            MockBackend::new("fast", 20),
        ]);
        let ctx = ProbeContext::with_timeout(Duration::from_millis(50));
        let started = Instant::now();
        let result = d.select_best(&ctx).await;
        assert!(matches!(result, Err(BackendError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_explicit_cancel() {
        let d = detector(vec![
            MockBackend::new("slow", 10).delay(Duration::from_secs(30))
        ]);
        let ctx = ProbeContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        assert!(matches!(
            d.select_best(&ctx).await,
            Err(BackendError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_select_by_name_auto_matches_select_best() {
        let d = detector(vec![
            MockBackend::new("lan", 10),
            MockBackend::new("tailscale", 40).connected(false),
        ]);
        let ctx = ProbeContext::new();
        let best = d.select_best(&ctx).await.unwrap();
        let auto = d.select_by_name(&ctx, "auto").await.unwrap();
        let empty = d.select_by_name(&ctx, "").await.unwrap();
        assert_eq!(best.name(), "lan");
        assert_eq!(auto.name(), best.name());
        assert_eq!(empty.name(), best.name());
    }

    #[tokio::test]
    async fn test_select_by_name_explicit_not_connected() {
        let d = detector(vec![
            MockBackend::new("lan", 10),
            MockBackend::new("tailscale", 40).connected(false),
        ]);
        let chosen = d
            .select_by_name(&ProbeContext::new(), "tailscale")
            .await
            .unwrap();
        assert_eq!(chosen.name(), "tailscale");
    }

    #[tokio::test]
    async fn test_select_by_name_unavailable() {
        let d = detector(vec![MockBackend::new("netbird", 50).available(false)]);
        assert!(matches!(
            d.select_by_name(&ProbeContext::new(), "netbird").await,
            Err(BackendError::BackendUnavailable(name)) if name == "netbird"
        ));
    }

    #[tokio::test]
    async fn test_select_by_name_unknown_never_probes() {
        let a = Arc::new(MockBackend::new("a", 10));
        let b = Arc::new(MockBackend::new("b", 20));
        let mut registry = Registry::new();
        registry.register(a.clone());
        registry.register(b.clone());
        let d = Detector::new(registry);

        assert!(matches!(
            d.select_by_name(&ProbeContext::new(), "nonexistent").await,
            Err(BackendError::UnknownBackend(_))
        ));
        assert_eq!(a.probe_count(), 0);
        assert_eq!(b.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_resolve_host_direct() {
        let d = detector(vec![MockBackend::new("test", 10)]);
        let backend = d.registry().get("test").unwrap();
        let ip = d
            .resolve_host(&ProbeContext::new(), backend.as_ref(), "testhost")
            .await
            .unwrap();
        assert_eq!(ip, "192.168.1.1");
    }

    #[tokio::test]
    async fn test_resolve_host_falls_back_to_lan() {
        let d = detector(vec![MockBackend::new("tailscale", 40).address(None)])
            .with_fallback(Arc::new(
                MockBackend::new("lan", 10).address(Some("192.168.1.50")),
            ));
        let overlay = d.registry().get("tailscale").unwrap();
        let ip = d
            .resolve_host(&ProbeContext::new(), overlay.as_ref(), "db1")
            .await
            .unwrap();
        assert_eq!(ip, "192.168.1.50");
    }

    #[tokio::test]
    async fn test_resolve_host_keeps_overlay_error() {
        let d = detector(vec![MockBackend::new("tailscale", 40).address(None)])
            .with_fallback(Arc::new(MockBackend::new("lan", 10).address(None)));
        let overlay = d.registry().get("tailscale").unwrap();
        match d
            .resolve_host(&ProbeContext::new(), overlay.as_ref(), "db1")
            .await
        {
            Err(BackendError::PeerNotFound { backend, hostname }) => {
                assert_eq!(backend, "tailscale");
                assert_eq!(hostname, "db1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_host_lan_has_no_fallback() {
        let fallback = Arc::new(MockBackend::new("lan", 10).address(Some("10.0.0.1")));
        let d = detector(vec![MockBackend::new("lan", 10).address(None)])
            .with_fallback(fallback.clone());
        let lan = d.registry().get("lan").unwrap();
        assert!(d
            .resolve_host(&ProbeContext::new(), lan.as_ref(), "db1")
            .await
            .is_err());
        assert_eq!(fallback.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_health_check() {
        let d = detector(vec![
            MockBackend::new("available-connected", 10),
            MockBackend::new("available-disconnected", 10).connected(false),
            MockBackend::new("unavailable", 10).available(false),
        ]);
        let results = d.health_check(&ProbeContext::new()).await;
        assert_eq!(results.len(), 3);

        for result in &results {
            match result.backend.as_str() {
                "available-connected" => {
                    assert!(result.available);
                    assert!(result.connected);
                    assert_eq!(result.message, "Mock status");
                }
                "available-disconnected" => {
                    assert!(result.available);
                    assert!(!result.connected);
                }
                "unavailable" => {
                    assert!(!result.available);
                    assert!(!result.connected);
                    assert_eq!(result.message, "Not installed");
                }
                other => panic!("unexpected backend {}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_detect_all_and_by_name() {
        let d = detector(vec![
            MockBackend::new("backend1", 10),
            MockBackend::new("backend2", 20).available(false),
        ]);
        let ctx = ProbeContext::new();

        let statuses = d.detect_all(&ctx).await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses["backend1"].connected);
        assert!(!statuses["backend2"].connected);
        assert_eq!(statuses["backend2"].message, "Not installed");

        let status = d.detect_by_name(&ctx, "backend1").await.unwrap();
        assert!(status.connected);
        assert!(d.detect_by_name(&ctx, "missing").await.is_err());
    }
}
