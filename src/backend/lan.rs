// LAN backend
// 直连局域网/IP：始终可用，通过网卡状态判断连通，通过 DNS 解析主机名

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::context::ProbeContext;
use super::error::{BackendError, BackendResult};
use super::runner::{CommandRunner, SystemRunner};
use super::{Backend, Status};

pub const NAME: &str = "lan";
const PRIORITY: i32 = 10;

/// 网卡地址
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub address: IpAddr,
}

/// LAN backend
pub struct LanBackend {
    runner: Arc<dyn CommandRunner>,
}

impl LanBackend {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// 列出处于 UP 状态的非回环网卡地址
    /// 优先使用 `ip`，不存在时退回 `ifconfig`；都失败时返回空列表
    pub async fn interfaces(&self, ctx: &ProbeContext) -> Vec<InterfaceAddr> {
        if self.runner.is_installed("ip") {
            match self.runner.run(ctx, "ip", &["-o", "addr", "show", "up"]).await {
                Ok(out) => return parse_ip_addr(&out.stdout_string()),
                Err(e) => debug!("[LAN] ip addr failed: {}", e),
            }
        }
        if self.runner.is_installed("ifconfig") {
            match self.runner.run(ctx, "ifconfig", &[]).await {
                Ok(out) => return parse_ifconfig(&out.stdout_string()),
                Err(e) => debug!("[LAN] ifconfig failed: {}", e),
            }
        }
        Vec::new()
    }
}

impl Default for LanBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemRunner::new()))
    }
}

#[async_trait]
impl Backend for LanBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> i32 {
        PRIORITY
    }

    async fn is_available(&self, _ctx: &ProbeContext) -> bool {
        true
    }

    async fn is_connected(&self, ctx: &ProbeContext) -> bool {
        !self.interfaces(ctx).await.is_empty()
    }

    async fn status(&self, ctx: &ProbeContext) -> BackendResult<Status> {
        let interfaces = self.interfaces(ctx).await;
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        if interfaces.is_empty() {
            return Ok(Status::new(NAME, false, "No active network interfaces"));
        }

        let mut status = Status::new(NAME, true, "Network interfaces active");
        status.local_address = interfaces
            .iter()
            .find(|i| i.address.is_ipv4())
            .or_else(|| interfaces.first())
            .map(|i| i.address.to_string());
        Ok(status)
    }

    async fn peer_address(&self, ctx: &ProbeContext, hostname: &str) -> BackendResult<String> {
        if let Ok(ip) = hostname.parse::<IpAddr>() {
            return Ok(ip.to_string());
        }

        let host = hostname.to_string();
        let resolved = ctx
            .run(async {
                let addrs = tokio::net::lookup_host((host.as_str(), 0)).await?;
                Ok::<_, BackendError>(addrs.map(|a| a.ip()).collect::<Vec<_>>())
            })
            .await;

        let addrs = match resolved {
            Ok(addrs) => addrs,
            Err(BackendError::Io(e)) => {
                debug!("[LAN] DNS lookup for {} failed: {}", hostname, e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .map(|ip| ip.to_string())
            .ok_or_else(|| BackendError::PeerNotFound {
                backend: NAME.to_string(),
                hostname: hostname.to_string(),
            })
    }
}

/// 解析 `ip -o addr show up` 输出
/// 格式: `2: eth0    inet 192.168.1.20/24 brd ... scope global eth0`
pub fn parse_ip_addr(output: &str) -> Vec<InterfaceAddr> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let _index = tokens.next()?;
            let name = tokens.next()?.trim_end_matches(':');
            let family = tokens.next()?;
            if family != "inet" && family != "inet6" {
                return None;
            }
            let address = tokens.next()?.split('/').next()?.parse::<IpAddr>().ok()?;
            usable(name, address).then(|| InterfaceAddr {
                name: name.to_string(),
                address,
            })
        })
        .collect()
}

/// 解析 `ifconfig` 输出（BSD/macOS 与 net-tools 格式）
pub fn parse_ifconfig(output: &str) -> Vec<InterfaceAddr> {
    let mut result = Vec::new();
    let mut current: Option<(String, bool)> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            let name = line.split(':').next().unwrap_or_default().trim().to_string();
            let flags = line.to_ascii_uppercase();
            let up = flags.contains("<UP") || flags.contains(",UP") || flags.contains(" UP ");
            let loopback = flags.contains("LOOPBACK");
            current = Some((name, up && !loopback));
            continue;
        }

        let Some((name, true)) = &current else {
            continue;
        };

        let mut tokens = line.split_whitespace();
        let family = tokens.next().unwrap_or_default();
        if family != "inet" && family != "inet6" {
            continue;
        }
        let Some(raw) = tokens.next() else {
            continue;
        };
        let raw = raw.trim_start_matches("addr:");
        let raw = raw.split(['%', '/']).next().unwrap_or_default();
        if let Ok(address) = raw.parse::<IpAddr>() {
            if usable(name, address) {
                result.push(InterfaceAddr {
                    name: name.clone(),
                    address,
                });
            }
        }
    }

    result
}

fn usable(name: &str, address: IpAddr) -> bool {
    name != "lo" && !address.is_loopback() && !address.is_unspecified()
}
