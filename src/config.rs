// 本地配置
// Linux: ~/.config/meshhop/settings.json
// macOS: ~/Library/Application Support/meshhop/settings.json

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{Registry, AUTO};
use crate::trust::{
    AcceptNew, AuditLog, FirstContactPolicy, HostTrustStore, RejectUnknown, TerminalPrompt,
};

const APP_DIR: &str = "meshhop";

/// 首次连接未知主机时的处理方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// 在终端询问
    #[default]
    Prompt,
    /// 拒绝（批处理）
    RejectUnknown,
    /// 自动接受
    AcceptNew,
}

impl HostKeyPolicy {
    pub fn build(self) -> Arc<dyn FirstContactPolicy> {
        match self {
            HostKeyPolicy::Prompt => Arc::new(TerminalPrompt),
            HostKeyPolicy::RejectUnknown => Arc::new(RejectUnknown),
            HostKeyPolicy::AcceptNew => Arc::new(AcceptNew),
        }
    }
}

/// 应用设置（持久化用）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// "auto" 或 backend 名称
    pub default_backend: String,
    pub probe_timeout_secs: u64,
    /// 为空时使用配置目录下的 known_hosts
    pub known_hosts_path: Option<PathBuf>,
    pub host_key_policy: HostKeyPolicy,
    pub audit_log: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_backend: AUTO.to_string(),
            probe_timeout_secs: 10,
            known_hosts_path: None,
            host_key_policy: HostKeyPolicy::Prompt,
            audit_log: false,
        }
    }
}

impl Settings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// 检查设置是否有效
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        if self.default_backend != AUTO && !registry.contains(&self.default_backend) {
            bail!(
                "unknown backend '{}' (expected one of: {}, {})",
                self.default_backend,
                AUTO,
                registry.names().join(", ")
            );
        }
        if self.probe_timeout_secs == 0 {
            bail!("probe_timeout_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn known_hosts_file(&self) -> Result<PathBuf> {
        match &self.known_hosts_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_dir()?.join("known_hosts")),
        }
    }

    /// 按设置打开信任存储
    pub fn open_trust_store(&self, policy: HostKeyPolicy) -> Result<HostTrustStore> {
        let path = self.known_hosts_file()?;
        let mut store = HostTrustStore::open(&path, policy.build())
            .with_context(|| format!("无法打开 known_hosts: {}", path.display()))?;
        if self.audit_log {
            let audit_path = match path.parent() {
                Some(dir) => dir.join("audit.log"),
                None => get_config_dir()?.join("audit.log"),
            };
            store = store.with_audit(AuditLog::new(audit_path));
        }
        Ok(store)
    }
}

/// 获取配置目录路径
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("无法获取系统配置目录")?
        .join(APP_DIR);
    Ok(config_dir)
}

/// 获取设置文件路径
pub fn get_settings_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("settings.json"))
}

/// 加载设置；文件不存在时使用默认值
pub fn load_settings() -> Result<Settings> {
    load_settings_from(&get_settings_file()?)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path).context("无法读取设置文件")?;
    let settings: Settings = serde_json::from_str(&content).context("无法解析设置文件")?;
    Ok(settings)
}

/// 保存设置
pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).context("无法创建配置目录")?;
    }
    let content = serde_json::to_string_pretty(settings).context("无法序列化设置")?;
    fs::write(path, content).context("无法写入设置文件")?;
    Ok(())
}
