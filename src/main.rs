// meshhop - 诊断命令行
// 查看 backend 状态、解析主机名、管理 known_hosts

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use meshhop::backend::{Detector, ProbeContext, Registry};
use meshhop::config::{self, HostKeyPolicy};
use meshhop::resolver::ConnectionResolver;
use meshhop::trust::host_pattern;

#[derive(Parser, Debug)]
#[command(name = "meshhop", version, about = "Overlay-aware host resolution and SSH host key trust")]
struct Cli {
    /// backend 偏好："auto" 或 backend 名称（默认取设置）
    #[arg(long, short)]
    backend: Option<String>,
    /// 探测超时（秒，默认取设置）
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
    /// 未知主机的处理方式（默认取设置）
    #[arg(long, value_enum)]
    host_key_policy: Option<PolicyArg>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 显示 backend 状态
    Status {
        /// 只显示指定 backend
        name: Option<String>,
    },
    /// 健康检查
    Health,
    /// 显示按偏好选中的 backend
    Select,
    /// 解析主机名
    Resolve {
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
    },
    /// 管理 known_hosts
    KnownHosts {
        #[command(subcommand)]
        command: KnownHostsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum KnownHostsCommand {
    /// 列出已信任的公钥
    List,
    /// 删除主机的全部公钥
    Remove {
        host: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
    },
}

/// 命令行覆盖的首次连接策略
#[derive(Clone, Copy, Debug, ValueEnum)]
enum PolicyArg {
    Prompt,
    RejectUnknown,
    AcceptNew,
}

impl From<PolicyArg> for HostKeyPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Prompt => HostKeyPolicy::Prompt,
            PolicyArg::RejectUnknown => HostKeyPolicy::RejectUnknown,
            PolicyArg::AcceptNew => HostKeyPolicy::AcceptNew,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 可以通过 RUST_LOG 环境变量控制日志级别，例如：RUST_LOG=debug meshhop status
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = config::load_settings()?;
    let registry = Registry::with_defaults();
    settings.validate(&registry)?;

    let preference = cli
        .backend
        .clone()
        .unwrap_or_else(|| settings.default_backend.clone());
    let timeout = cli
        .timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| settings.probe_timeout());
    let ctx = ProbeContext::with_timeout(timeout);

    // Ctrl-C 取消正在进行的探测
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let detector = Detector::new(registry);
    match cli.command {
        Command::Status { name } => {
            let statuses = match name {
                Some(name) => vec![detector.detect_by_name(&ctx, &name).await?],
                None => detector.detect_all(&ctx).await.into_values().collect(),
            };
            for status in statuses {
                println!(
                    "{:<10} {:<9} {}",
                    status.backend,
                    if status.connected { "connected" } else { "-" },
                    status.message
                );
                if let Some(address) = &status.local_address {
                    println!("{:<10} local {}", "", address);
                }
                for peer in &status.peers {
                    println!(
                        "{:<10}   {:<24} {:<16} {}",
                        "",
                        peer.hostname,
                        peer.address,
                        if peer.online { "online" } else { "offline" }
                    );
                }
            }
        }
        Command::Health => {
            for result in detector.health_check(&ctx).await {
                println!(
                    "{:<10} available={:<5} connected={:<5} {:>6}ms  {}",
                    result.backend,
                    result.available,
                    result.connected,
                    result.duration.as_millis(),
                    result.message
                );
            }
        }
        Command::Select => {
            let backend = detector.select_by_name(&ctx, &preference).await?;
            println!("{}", backend.name());
        }
        Command::Resolve { host, port } => {
            let policy = cli
                .host_key_policy
                .map(HostKeyPolicy::from)
                .unwrap_or(settings.host_key_policy);
            let store = settings.open_trust_store(policy)?;
            let resolver = ConnectionResolver::new(detector, Arc::new(store));
            let target = resolver
                .resolve(&ctx, &host, &preference)
                .await
                .with_context(|| format!("failed to resolve {}", host))?;
            let handler = target.handler(&resolver, port);
            println!("{} {} {}", target.address, target.backend, handler.host());
        }
        Command::KnownHosts { command } => {
            let store = settings.open_trust_store(HostKeyPolicy::RejectUnknown)?;
            match command {
                KnownHostsCommand::List => {
                    for entry in store.entries()? {
                        println!(
                            "{} {} {}",
                            entry.hosts.join(","),
                            entry.key.algorithm,
                            entry.key.fingerprint()
                        );
                    }
                }
                KnownHostsCommand::Remove { host, port } => {
                    let removed = store.remove(&host_pattern(&host, port))?;
                    println!("Removed {} entries for {}", removed, host);
                }
            }
        }
    }

    Ok(())
}
