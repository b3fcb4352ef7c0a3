// Headscale backend
// Headscale 客户端就是 tailscale 客户端，只是连接自建控制服务器
// 从客户端无法区分两者，该 backend 用于显式指定 Headscale 的场景

use std::sync::Arc;

use async_trait::async_trait;

use super::context::ProbeContext;
use super::error::BackendResult;
use super::runner::{CommandRunner, SystemRunner};
use super::tailscale::TailnetClient;
use super::{Backend, Status};

pub const NAME: &str = "headscale";
/// 低于 tailscale，auto 模式下普通 Tailscale 安装报告为 tailscale
const PRIORITY: i32 = 35;

/// Headscale backend
pub struct HeadscaleBackend {
    client: TailnetClient,
}

impl HeadscaleBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            client: TailnetClient::new(runner, NAME),
        }
    }
}

impl Default for HeadscaleBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner::new()))
    }
}

#[async_trait]
impl Backend for HeadscaleBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    async fn is_available(&self, _ctx: &ProbeContext) -> bool {
        self.client.is_installed()
    }

    async fn is_connected(&self, ctx: &ProbeContext) -> bool {
        self.client.is_connected(ctx).await
    }

    async fn status(&self, ctx: &ProbeContext) -> BackendResult<Status> {
        self.client
            .status(ctx, |state| format!("Headscale ({})", state))
            .await
    }

    async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
        self.client.peer_address(ctx, hostname).await
    }
}
