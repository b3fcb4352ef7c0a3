// 网络覆盖层（backend）模块
//
// 模块结构:
// - context: 探测上下文（取消与超时）
// - error: 错误类型 (BackendError)
// - runner: 外部命令执行抽象 (CommandRunner)
// - lan / tailscale / headscale / netbird: 各 backend 实现
// - registry: backend 注册表
// - detector: 自动探测与选择

pub mod context;
pub mod detector;
pub mod error;
pub mod headscale;
pub mod lan;
pub mod netbird;
pub mod registry;
pub mod runner;
pub mod tailscale;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};

pub use context::ProbeContext;
pub use detector::{Detector, HealthCheckResult};
pub use error::{BackendError, BackendResult, ProbeFailure};
pub use headscale::HeadscaleBackend;
pub use lan::LanBackend;
pub use netbird::NetBirdBackend;
pub use registry::Registry;
pub use runner::{CommandOutput, CommandRunner, ScriptedRunner, SystemRunner};
pub use tailscale::TailscaleBackend;

/// 自动选择的哨兵值
pub const AUTO: &str = "auto";

/// 一种到达远程主机的方式（直连 LAN 或某个 mesh VPN）
#[async_trait]
pub trait Backend: Send + Sync {
    /// 稳定的名称
    fn name(&self) -> &str;

    /// 自动探测优先级（越大越优先）
    fn priority(&self) -> i32;

    /// 客户端程序是否已安装
    async fn is_available(&self, ctx: &ProbeContext) -> bool;

    /// 是否已加入网络；解析失败视为未连接
    async fn is_connected(&self, ctx: &ProbeContext) -> bool;

    /// 详细状态，连接时包含 peer 列表
    async fn status(&self, ctx: &ProbeContext) -> BackendResult<Status>;

    /// 将逻辑主机名解析为该网络中可达的地址
    async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String>;
}

/// Backend 状态快照
#[derive(Clone, Debug)]
pub struct Status {
    pub backend: String,
    pub connected: bool,
    pub message: String,
    /// 本机在该网络中的地址
    pub local_address: Option<String>,
    pub peers: Vec<PeerInfo>,
    pub observed_at: DateTime<Local>,
}

impl Status {
    /// 新建状态（时间戳取当前时间）
    pub fn new(backend: impl Into<String>, connected: bool, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            connected,
            message: message.into(),
            local_address: None,
            peers: Vec::new(),
            observed_at: Local::now(),
        }
    }

    /// 按主机名（忽略大小写）查找 peer 地址
    pub fn find_peer(&self, hostname: &str) -> Option<&PeerInfo> {
        self.peers
            .iter()
            .find(|p| p.matches(hostname) && !p.address.is_empty())
    }
}

/// 网络中的一个 peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub hostname: String,
    pub address: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PeerInfo {
    /// 主机名匹配：完整名称或第一段标签，忽略大小写
    pub fn matches(&self, hostname: &str) -> bool {
        if self.hostname.eq_ignore_ascii_case(hostname) {
            return true;
        }
        let short = self.hostname.split('.').next().unwrap_or_default();
        !hostname.contains('.') && short.eq_ignore_ascii_case(hostname)
    }
}
