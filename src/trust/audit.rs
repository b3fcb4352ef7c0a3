// 信任决策审计日志（JSON Lines）

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    AcceptedKnown,
    Learned,
    Rejected,
    Mismatch,
    Revoked,
    Removed,
}

/// 一条审计记录
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub event: AuditEvent,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, host: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            event,
            host: host.to_string(),
            algorithm: None,
            fingerprint: None,
        }
    }

    pub fn with_key(mut self, algorithm: &str, fingerprint: String) -> Self {
        self.algorithm = Some(algorithm.to_string());
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// 追加写入的审计日志文件
#[derive(Clone, Debug)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一条记录；写入失败只记日志，不影响信任决策
    pub fn record(&self, record: &AuditRecord) {
        if let Err(e) = self.append(record) {
            tracing::warn!(
                "[Trust] Failed to write audit log {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn append(&self, record: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&self.path)?.write_all(line.as_bytes())
    }

    /// 读取全部记录（跳过无法解析的行）
    pub fn read(&self) -> std::io::Result<Vec<AuditRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_records_are_json_lines() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"));

        log.record(&AuditRecord::new(AuditEvent::Learned, "db1").with_key("ssh-ed25519", "SHA256:abc".into()));
        log.record(&AuditRecord::new(AuditEvent::Removed, "db1"));

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.lines().next().unwrap().contains("\"event\":\"learned\""));

        let records = log.read().unwrap();
        assert_eq!(records[0].event, AuditEvent::Learned);
        assert_eq!(records[0].fingerprint.as_deref(), Some("SHA256:abc"));
        assert_eq!(records[1].event, AuditEvent::Removed);
        assert!(records[1].algorithm.is_none());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("none.log"));
        assert!(log.read().unwrap().is_empty());
    }
}
