// NetBird backend
// `netbird status` 没有 JSON 输出，这里解析文本格式

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

use super::context::ProbeContext;
use super::error::{BackendError, BackendResult};
use super::runner::{CommandRunner, SystemRunner};
use super::{Backend, PeerInfo, Status};

pub const NAME: &str = "netbird";
const PRIORITY: i32 = 50;
const PROGRAM: &str = "netbird";

/// `netbird status` 解析结果
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetBirdState {
    pub connected: bool,
    pub state: String,
    pub local_address: Option<String>,
}

/// NetBird backend
pub struct NetBirdBackend {
    runner: Arc<dyn CommandRunner>,
}

impl NetBirdBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn fetch_state(&self, ctx: &ProbeContext) -> BackendResult<NetBirdState> {
        let output = self.runner.run(ctx, PROGRAM, &["status"]).await?;
        Ok(parse_status(&output.stdout_string()))
    }

    /// 从详细状态中获取 peer 列表；命令失败时返回空列表
    async fn peer_list(&self, ctx: &ProbeContext) -> BackendResult<Vec<PeerInfo>> {
        match self.runner.run(ctx, PROGRAM, &["status", "-d"]).await {
            Ok(output) => Ok(parse_peers(&output.stdout_string())),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                debug!("[NetBird] detailed status failed: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

impl Default for NetBirdBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner::new()))
    }
}

#[async_trait]
impl Backend for NetBirdBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    async fn is_available(&self, _ctx: &ProbeContext) -> bool {
        self.runner.is_installed(PROGRAM)
    }

    async fn is_connected(&self, ctx: &ProbeContext) -> bool {
        if !self.runner.is_installed(PROGRAM) {
            return false;
        }
        match self.fetch_state(ctx).await {
            Ok(state) => state.connected,
            Err(e) => {
                debug!("[NetBird] status probe failed: {}", e);
                false
            }
        }
    }

    async fn status(&self, ctx: &ProbeContext) -> BackendResult<Status> {
        if !self.runner.is_installed(PROGRAM) {
            return Err(BackendError::NotAvailable(NAME.to_string()));
        }

        let state = self.fetch_state(ctx).await?;
        let mut status = Status::new(NAME, state.connected, state.state);
        status.local_address = state.local_address;
        if status.connected {
            status.peers = self.peer_list(ctx).await?;
        }
        Ok(status)
    }

    async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
        if !self.is_connected(ctx).await {
            if let Some(err) = ctx.err() {
                return Err(err);
            }
            return Err(BackendError::NotConnected(NAME.to_string()));
        }

        self.peer_list(ctx)
            .await?
            .into_iter()
            .find(|p| p.matches(hostname) && !p.address.is_empty())
            .map(|p| p.address)
            .ok_or_else(|| BackendError::PeerNotFound {
                backend: NAME.to_string(),
                hostname: hostname.to_string(),
            })
    }
}

fn split_field(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim().to_ascii_lowercase(), value.trim()))
}

fn strip_prefix_len(address: &str) -> String {
    address.split('/').next().unwrap_or_default().trim().to_string()
}

/// 解析 `netbird status` 输出
///
/// 新版本输出 `Management: Connected`，旧版本输出 `Status: Connected`；
/// `Daemon status: NeedsLogin` 表示尚未登录。
/// 注意 "Disconnected" 也包含 "connected"，必须先排除。
pub fn parse_status(output: &str) -> NetBirdState {
    let mut management: Option<bool> = None;
    let mut status_line: Option<(bool, String)> = None;
    let mut daemon_state: Option<String> = None;
    let mut local_address = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.eq_ignore_ascii_case("peers detail:") {
            break;
        }
        let Some((key, value)) = split_field(line) else {
            continue;
        };
        let lower = value.to_ascii_lowercase();
        let is_connected = lower.starts_with("connected");

        match key.as_str() {
            "management" => management = Some(is_connected),
            "status" => status_line = Some((is_connected, value.to_string())),
            "daemon status" => daemon_state = Some(value.to_string()),
            "netbird ip" | "local ip" | "interface ip" => {
                let address = strip_prefix_len(value);
                if address.parse::<IpAddr>().is_ok() {
                    local_address = Some(address);
                }
            }
            _ => {}
        }
    }

    let needs_login = daemon_state
        .as_deref()
        .is_some_and(|s| !s.eq_ignore_ascii_case("connected"));
    let connected = !needs_login
        && (management == Some(true) || status_line.as_ref().is_some_and(|(c, _)| *c));

    let state = match (status_line, daemon_state) {
        (Some((_, text)), _) if !text.is_empty() => text,
        (_, Some(daemon)) if needs_login => daemon,
        _ if connected => "Connected".to_string(),
        _ => "Disconnected".to_string(),
    };

    NetBirdState {
        connected,
        state,
        local_address,
    }
}

/// 解析 `netbird status -d` 中的 peer 列表
///
/// 支持两种格式：
/// - 详细块：` db1.netbird.cloud:` 后跟 `NetBird IP:` / `Status:` 等字段
/// - 单行：`peer db1 100.119.0.2`
pub fn parse_peers(output: &str) -> Vec<PeerInfo> {
    let mut peers = Vec::new();
    let mut in_detail = false;
    let mut current: Option<PeerInfo> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(peer) = parse_single_line_peer(line) {
            peers.push(peer);
            continue;
        }

        if line.eq_ignore_ascii_case("peers detail:") {
            in_detail = true;
            continue;
        }
        if !in_detail {
            continue;
        }

        let indented = raw.starts_with(char::is_whitespace);
        if !indented {
            // 详细块结束
            in_detail = false;
            peers.extend(current.take());
            continue;
        }

        if line.ends_with(':') && !line.contains(": ") {
            peers.extend(current.take());
            current = Some(PeerInfo {
                hostname: line.trim_end_matches(':').to_string(),
                address: String::new(),
                online: false,
                last_seen: None,
            });
            continue;
        }

        let (Some(peer), Some((key, value))) = (current.as_mut(), split_field(line)) else {
            continue;
        };
        match key.as_str() {
            "netbird ip" => peer.address = strip_prefix_len(value),
            "status" => peer.online = value.eq_ignore_ascii_case("connected"),
            "last connection update" => peer.last_seen = parse_timestamp(value),
            _ => {}
        }
    }

    peers.extend(current);
    peers
}

fn parse_single_line_peer(line: &str) -> Option<PeerInfo> {
    let mut tokens = line.split_whitespace();
    if !tokens.next()?.eq_ignore_ascii_case("peer") {
        return None;
    }
    let hostname = tokens.next()?.trim_end_matches(':');
    let address = tokens.next()?;
    let address = strip_prefix_len(address);
    if address.parse::<IpAddr>().is_err() || hostname.is_empty() {
        return None;
    }
    Some(PeerInfo {
        hostname: hostname.to_string(),
        address,
        online: true,
        last_seen: None,
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}
