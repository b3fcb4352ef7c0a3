// 主机信任存储（TOFU）
//
// 验证流程：
// 1. 公钥被 @revoked 吊销 -> 失败
// 2. 已知且一致 -> 接受
// 3. 该主机已有其他公钥（包括其他算法） -> 失败（可能是中间人攻击），不修改存储，不询问策略
// 4. 未知 -> 询问首次连接策略，接受后写入 known_hosts
//
// 写入时对同目录下的 .lock 文件加排他锁，锁内重新读取并检查后再追加
// verify 中的文件读写和加锁都在 spawn_blocking 中执行

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, info, warn};

use super::audit::{AuditEvent, AuditLog, AuditRecord};
use super::error::{TrustError, TrustResult};
use super::fingerprint::HostKey;
use super::known_hosts::{self, KnownHostEntry, Line};
use super::policy::{Decision, FirstContact, FirstContactPolicy};

/// 检查结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// 已知且一致
    Known,
    /// 该主机已信任其他公钥；stored 为第一条匹配的记录
    Mismatch { stored: HostKey },
    /// 公钥已被吊销
    Revoked,
    /// 未知
    Unknown,
}

/// 持久化的主机公钥信任存储
pub struct HostTrustStore {
    path: PathBuf,
    policy: Arc<dyn FirstContactPolicy>,
    audit: Option<AuditLog>,
}

impl HostTrustStore {
    /// 打开（必要时创建）known_hosts 文件；无法创建时直接失败
    pub fn open(
        path: impl Into<PathBuf>,
        policy: Arc<dyn FirstContactPolicy>,
    ) -> TrustResult<Self> {
        let path = path.into();
        ensure_file(&path).map_err(|e| TrustError::store(&path, e))?;
        debug!("[Trust] Using known hosts file {}", path.display());
        Ok(Self {
            path,
            policy,
            audit: None,
        })
    }

    /// 打开默认位置的 known_hosts
    pub fn open_default(policy: Arc<dyn FirstContactPolicy>) -> TrustResult<Self> {
        Self::open(default_path()?, policy)
    }

    /// 启用审计日志
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 所有可匹配的条目（不含 @revoked）
    pub fn entries(&self) -> TrustResult<Vec<KnownHostEntry>> {
        Ok(read_lines(&self.path)?
            .into_iter()
            .filter_map(|line| match line {
                Line::Entry { entry, .. } => Some(entry),
                _ => None,
            })
            .collect())
    }

    /// 只检查，不询问也不写入
    pub fn check(&self, host: &str, key: &HostKey) -> TrustResult<Verdict> {
        Ok(verdict(&read_lines(&self.path)?, host, key))
    }

    /// 完整验证流程
    pub async fn verify(&self, host: &str, key: &HostKey) -> TrustResult<()> {
        let fingerprint = key.fingerprint();
        let record = |event| {
            AuditRecord::new(event, host).with_key(&key.algorithm, fingerprint.sha256())
        };

        let (h, k) = (host.to_string(), key.clone());
        let checked = self.blocking(move |path| check_at(path, &h, &k)).await?;
        match checked {
            Verdict::Known => {
                debug!("[Trust] {} matches known {} key", host, key.algorithm);
                self.audit(record(AuditEvent::AcceptedKnown)).await;
                Ok(())
            }
            Verdict::Mismatch { stored } => {
                self.audit(record(AuditEvent::Mismatch)).await;
                Err(mismatch(host, &stored, key))
            }
            Verdict::Revoked => {
                self.audit(record(AuditEvent::Revoked)).await;
                Err(revoked(host, key))
            }
            Verdict::Unknown => {
                let request = FirstContact {
                    host: host.to_string(),
                    algorithm: key.algorithm.clone(),
                    fingerprint: fingerprint.clone(),
                };
                match self.policy.decide(&request).await? {
                    Decision::Accept => {
                        let (h, k) = (host.to_string(), key.clone());
                        match self.blocking(move |path| learn_at(path, &h, &k)).await? {
                            Verdict::Known | Verdict::Unknown => {}
                            Verdict::Mismatch { stored } => {
                                self.audit(record(AuditEvent::Mismatch)).await;
                                return Err(mismatch(host, &stored, key));
                            }
                            Verdict::Revoked => {
                                self.audit(record(AuditEvent::Revoked)).await;
                                return Err(revoked(host, key));
                            }
                        }
                        info!(
                            "[Trust] Permanently added '{}' ({}) to the list of known hosts",
                            host, key.algorithm
                        );
                        self.audit(record(AuditEvent::Learned)).await;
                        Ok(())
                    }
                    Decision::Reject => {
                        self.audit(record(AuditEvent::Rejected)).await;
                        Err(TrustError::HostKeyRejected {
                            host: host.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// 写入一条信任记录
    /// 同一 (主机, 算法) 已有相同公钥时返回 false；已有不同公钥时返回 Conflict；
    /// 公钥已被吊销时返回 HostKeyRevoked
    pub fn add(&self, host: &str, key: &HostKey) -> TrustResult<bool> {
        let _lock = lock(&self.path)?;
        let content = read_content(&self.path)?;
        let lines = known_hosts::parse(&content);

        if is_revoked(&lines, host, key) {
            return Err(revoked(host, key));
        }
        for (number, line) in lines.iter().enumerate() {
            let Some(entry) = line.entry() else { continue };
            if !entry.matches(host) || entry.key.algorithm != key.algorithm {
                continue;
            }
            if entry.key.blob == key.blob {
                return Ok(false);
            }
            return Err(TrustError::Conflict {
                host: host.to_string(),
                algorithm: key.algorithm.clone(),
                line: number + 1,
            });
        }

        append_entry(&self.path, &content, host, key)?;
        Ok(true)
    }

    /// 从所有条目的主机列表中删除该主机（精确匹配），返回受影响的条目数
    /// @revoked 行原样保留
    pub fn remove(&self, host: &str) -> TrustResult<usize> {
        let _lock = lock(&self.path)?;
        let lines = read_lines(&self.path)?;

        let mut removed = 0;
        let mut kept = Vec::with_capacity(lines.len());
        for line in lines {
            match line {
                Line::Entry { mut entry, raw } if entry.lists_exactly(host) => {
                    removed += 1;
                    entry.hosts.retain(|h| !h.eq_ignore_ascii_case(host));
                    if entry.hosts.iter().any(|h| !h.starts_with('!')) {
                        kept.push(entry.to_line());
                    } else {
                        debug!("[Trust] Dropping line: {}", raw);
                    }
                }
                other => kept.push(other.raw().to_string()),
            }
        }

        if removed > 0 {
            let mut content = kept.join("\n");
            if !content.is_empty() {
                content.push('\n');
            }
            write_atomic(&self.path, content.as_bytes())
                .map_err(|e| TrustError::store(&self.path, e))?;
            info!("[Trust] Removed {} from {} entries", host, removed);
            if let Some(audit) = &self.audit {
                audit.record(&AuditRecord::new(AuditEvent::Removed, host));
            }
        }
        Ok(removed)
    }

    /// 在阻塞线程池中操作 known_hosts 文件
    async fn blocking<T, F>(&self, f: F) -> TrustResult<T>
    where
        F: FnOnce(&Path) -> TrustResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || f(&path))
            .await
            .map_err(|e| TrustError::store(&self.path, io::Error::other(e)))?
    }

    async fn audit(&self, record: AuditRecord) {
        let Some(audit) = self.audit.clone() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || audit.record(&record)).await {
            warn!("[Trust] Audit task failed: {}", e);
        }
    }
}

fn mismatch(host: &str, stored: &HostKey, presented: &HostKey) -> TrustError {
    warn!(
        "[Trust] Host key mismatch for {}: stored {} {}, presented {} {}",
        host,
        stored.algorithm,
        stored.fingerprint().sha256(),
        presented.algorithm,
        presented.fingerprint().sha256()
    );
    TrustError::HostKeyMismatch {
        host: host.to_string(),
        stored_algorithm: stored.algorithm.clone(),
        stored: stored.fingerprint(),
        presented_algorithm: presented.algorithm.clone(),
        presented: presented.fingerprint(),
    }
}

fn revoked(host: &str, key: &HostKey) -> TrustError {
    let fingerprint = key.fingerprint();
    warn!(
        "[Trust] {} presented revoked {} key {}",
        host,
        key.algorithm,
        fingerprint.sha256()
    );
    TrustError::HostKeyRevoked {
        host: host.to_string(),
        algorithm: key.algorithm.clone(),
        fingerprint,
    }
}

fn check_at(path: &Path, host: &str, key: &HostKey) -> TrustResult<Verdict> {
    Ok(verdict(&read_lines(path)?, host, key))
}

/// 加锁后重新检查，仍未知时追加；返回锁内看到的检查结果
fn learn_at(path: &Path, host: &str, key: &HostKey) -> TrustResult<Verdict> {
    let _lock = lock(path)?;
    let content = read_content(path)?;
    let checked = verdict(&known_hosts::parse(&content), host, key);
    if checked == Verdict::Unknown {
        append_entry(path, &content, host, key)?;
    }
    Ok(checked)
}

fn append_entry(path: &Path, content: &str, host: &str, key: &HostKey) -> TrustResult<()> {
    let mut text = String::new();
    if !content.is_empty() && !content.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&KnownHostEntry::new(host, key.clone()).to_line());
    text.push('\n');

    open_append(path)
        .and_then(|mut file| file.write_all(text.as_bytes()))
        .map_err(|e| TrustError::store(path, e))
}

fn read_content(path: &Path) -> TrustResult<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(TrustError::store(path, e)),
    }
}

fn read_lines(path: &Path) -> TrustResult<Vec<Line>> {
    Ok(known_hosts::parse(&read_content(path)?))
}

/// 同目录下 .lock 文件的排他锁，File 释放时解锁
fn lock(path: &Path) -> TrustResult<File> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    let lock_path = path.with_file_name(name);

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| TrustError::store(&lock_path, e))?;
    file.lock_exclusive()
        .map_err(|e| TrustError::store(&lock_path, e))?;
    Ok(file)
}

/// 默认路径：<config_dir>/meshhop/known_hosts
pub fn default_path() -> TrustResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("meshhop").join("known_hosts"))
        .ok_or_else(|| {
            TrustError::store(
                "known_hosts",
                io::Error::new(io::ErrorKind::NotFound, "no configuration directory"),
            )
        })
}

fn verdict(lines: &[Line], host: &str, key: &HostKey) -> Verdict {
    if is_revoked(lines, host, key) {
        return Verdict::Revoked;
    }

    let mut stored = None;
    for entry in lines.iter().filter_map(Line::entry) {
        if !entry.matches(host) {
            continue;
        }
        if entry.key == *key {
            return Verdict::Known;
        }
        if stored.is_none() {
            stored = Some(entry.key.clone());
        }
    }

    match stored {
        Some(stored) => Verdict::Mismatch { stored },
        None => Verdict::Unknown,
    }
}

fn is_revoked(lines: &[Line], host: &str, key: &HostKey) -> bool {
    lines
        .iter()
        .filter_map(Line::revoked)
        .any(|entry| entry.matches(host) && entry.key == *key)
}

fn ensure_file(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o700);
            }
            builder.create(parent)?;
        }
    }
    open_append(path).map(drop)
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// 写入临时文件后重命名
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}
