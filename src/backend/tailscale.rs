// Tailscale backend
// 通过 `tailscale status --json` 与 `tailscale ip -4` 探测和解析
// Headscale 共用同一客户端，探测逻辑在 TailnetClient 中复用

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::debug;

use super::context::ProbeContext;
use super::error::{BackendError, BackendResult};
use super::runner::{CommandRunner, SystemRunner};
use super::{Backend, PeerInfo, Status};

pub const NAME: &str = "tailscale";
const PRIORITY: i32 = 40;

/// tailscale 客户端程序名
pub(crate) const PROGRAM: &str = "tailscale";
const RUNNING: &str = "Running";

/// `tailscale status --json` 输出
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TailnetStatus {
    pub backend_state: String,
    #[serde(rename = "Self", default)]
    pub self_node: Option<TailnetNode>,
    #[serde(default)]
    pub peer: Option<BTreeMap<String, TailnetNode>>,
}

/// 节点信息（本机与 peer 结构相同）
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TailnetNode {
    #[serde(default)]
    pub host_name: String,
    #[serde(rename = "DNSName", default)]
    pub dns_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    pub tailscale_ips: Option<Vec<String>>,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<String>,
}

impl TailnetNode {
    /// 优先返回 IPv4 地址
    fn primary_ip(&self) -> Option<String> {
        let ips = self.tailscale_ips.as_deref().unwrap_or_default();
        ips.iter()
            .find(|ip| ip.parse::<IpAddr>().map(|a| a.is_ipv4()).unwrap_or(false))
            .or_else(|| ips.first())
            .cloned()
    }

    fn to_peer(&self) -> PeerInfo {
        let hostname = if self.host_name.is_empty() {
            self.dns_name.trim_end_matches('.').to_string()
        } else {
            self.host_name.clone()
        };
        PeerInfo {
            hostname,
            address: self.primary_ip().unwrap_or_default(),
            online: self.online,
            last_seen: self.last_seen.as_deref().and_then(parse_last_seen),
        }
    }
}

impl TailnetStatus {
    pub fn is_running(&self) -> bool {
        self.backend_state == RUNNING
    }

    pub fn local_address(&self) -> Option<String> {
        self.self_node.as_ref().and_then(TailnetNode::primary_ip)
    }

    /// peer 列表，按节点 key 排序
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peer
            .as_ref()
            .map(|peers| peers.values().map(TailnetNode::to_peer).collect())
            .unwrap_or_default()
    }
}

/// 解析 RFC3339 时间；零值时间（从未在线）视为无
fn parse_last_seen(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}

/// tailscale 客户端的共享探测逻辑
pub(crate) struct TailnetClient {
    runner: Arc<dyn CommandRunner>,
    backend: &'static str,
}

impl TailnetClient {
    pub fn new(runner: Arc<dyn CommandRunner>, backend: &'static str) -> Self {
        Self { runner, backend }
    }

    pub fn is_installed(&self) -> bool {
        self.runner.is_installed(PROGRAM)
    }

    /// 执行并解析 `tailscale status --json`
    pub async fn fetch(&self, ctx: &ProbeContext) -> BackendResult<TailnetStatus> {
        let output = self
            .runner
            .run(ctx, PROGRAM, &["status", "--json"])
            .await?;
        serde_json::from_slice(&output.stdout).map_err(|e| BackendError::Parse {
            backend: self.backend.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn is_connected(&self, ctx: &ProbeContext) -> bool {
        if !self.is_installed() {
            return false;
        }
        match self.fetch(ctx).await {
            Ok(status) => status.is_running(),
            Err(e) => {
                debug!("[{}] status probe failed: {}", self.backend, e);
                false
            }
        }
    }

    pub async fn status(
        &self,
        ctx: &ProbeContext,
        describe: impl Fn(&str) -> String,
    ) -> BackendResult<Status> {
        if !self.is_installed() {
            return Err(BackendError::NotAvailable(self.backend.to_string()));
        }

        let parsed = self.fetch(ctx).await?;
        let mut status = Status::new(
            self.backend,
            parsed.is_running(),
            describe(&parsed.backend_state),
        );
        status.local_address = parsed.local_address();
        status.peers = parsed.peers();
        Ok(status)
    }

    pub async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
        if !self.is_connected(ctx).await {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            return Err(BackendError::NotConnected(self.backend.to_string()));
        }

        match self.runner.run(ctx, PROGRAM, &["ip", "-4", hostname]).await {
            Ok(output) => {
                let stdout = output.stdout_string();
                if let Some(ip) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
                    return Ok(ip.to_string());
                }
            }
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => debug!(
                "[{}] ip lookup for {} failed, scanning peers: {}",
                self.backend, hostname, e
            ),
        }

        let not_found = || BackendError::PeerNotFound {
            backend: self.backend.to_string(),
            hostname: hostname.to_string(),
        };

        match self.fetch(ctx).await {
            Ok(parsed) => parsed
                .peers()
                .into_iter()
                .find(|p| p.matches(hostname) && !p.address.is_empty())
                .map(|p| p.address)
                .ok_or_else(not_found),
            Err(e) if e.is_cancellation() => Err(e),
            Err(_) => Err(not_found()),
        }
    }
}

/// Tailscale backend
pub struct TailscaleBackend {
    client: TailnetClient,
}

impl TailscaleBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            client: TailnetClient::new(runner, NAME),
        }
    }
}

impl Default for TailscaleBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner::new()))
    }
}

#[async_trait]
impl Backend for TailscaleBackend {
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
        self.client.status(ctx, |state| state.to_string()).await
    }

    async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
        self.client.peer_address(ctx, hostname).await
    }
}
