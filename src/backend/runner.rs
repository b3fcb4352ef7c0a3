// 外部命令执行抽象
// 所有 backend 探测都通过 CommandRunner 执行，测试时替换为 ScriptedRunner

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use super::context::ProbeContext;
use super::error::{BackendError, BackendResult};

/// 命令执行结果
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// 标准输出
    pub stdout: Vec<u8>,
    /// 标准错误
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// 获取标准输出字符串
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// 获取标准错误字符串
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// 外部命令执行能力
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// 程序是否已安装（可在 PATH 中找到）
    fn is_installed(&self, program: &str) -> bool;

    /// 执行命令；非零退出码视为 CommandFailed
    async fn run(
        &self,
        ctx: &ProbeContext,
        program: &str,
        args: &[&str],
    ) -> BackendResult<CommandOutput>;
}

/// 使用 tokio::process 的真实执行器
#[derive(Clone, Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    fn is_installed(&self, program: &str) -> bool {
        find_in_path(program).is_some()
    }

    async fn run(
        &self,
        ctx: &ProbeContext,
        program: &str,
        args: &[&str],
    ) -> BackendResult<CommandOutput> {
        trace!("[Runner] {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = ctx
            .run(async {
                command
                    .output()
                    .await
                    .map_err(|e| BackendError::CommandFailed {
                        program: program.to_string(),
                        reason: e.to_string(),
                    })
            })
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BackendError::CommandFailed {
                program: program.to_string(),
                reason: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        Ok(CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// 在 PATH 中查找可执行文件
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(program);
        if is_executable(&full) {
            return Some(full);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", program));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
        None
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// 返回预设输出的执行器（测试用）
/// 未预设的命令按执行失败处理
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    installed: HashSet<String>,
    responses: HashMap<String, Result<String, String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记程序已安装
    pub fn installed(mut self, program: &str) -> Self {
        self.installed.insert(program.to_string());
        self
    }

    /// 预设命令成功输出
    pub fn respond(mut self, program: &str, args: &[&str], stdout: &str) -> Self {
        self.responses
            .insert(command_key(program, args), Ok(stdout.to_string()));
        self
    }

    /// 预设命令失败
    pub fn fail(mut self, program: &str, args: &[&str], stderr: &str) -> Self {
        self.responses
            .insert(command_key(program, args), Err(stderr.to_string()));
        self
    }

    /// 已执行的命令列表
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

fn command_key(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    fn is_installed(&self, program: &str) -> bool {
        self.installed.contains(program)
    }

    async fn run(
        &self,
        ctx: &ProbeContext,
        program: &str,
        args: &[&str],
    ) -> BackendResult<CommandOutput> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let key = command_key(program, args);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        match self.responses.get(&key) {
            Some(Ok(stdout)) => Ok(CommandOutput {
                stdout: stdout.clone().into_bytes(),
                stderr: Vec::new(),
            }),
            Some(Err(stderr)) => Err(BackendError::CommandFailed {
                program: program.to_string(),
                reason: stderr.clone(),
            }),
            None => Err(BackendError::CommandFailed {
                program: program.to_string(),
                reason: format!("no scripted response for '{}'", key),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_scripted_runner_records_calls() {
        let runner = ScriptedRunner::new()
            .installed("tailscale")
            .respond("tailscale", &["ip", "-4", "db1"], "100.64.0.7\n");
        let ctx = ProbeContext::new();

        assert!(runner.is_installed("tailscale"));
        assert!(!runner.is_installed("netbird"));

        let out = runner
            .run(&ctx, "tailscale", &["ip", "-4", "db1"])
            .await
            .unwrap();
        assert_eq!(out.stdout_string().trim(), "100.64.0.7");
        assert_eq!(runner.calls(), vec!["tailscale ip -4 db1".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_runner_unknown_command_fails() {
        let runner = ScriptedRunner::new();
        let result = runner.run(&ProbeContext::new(), "netbird", &["status"]).await;
        assert!(matches!(result, Err(BackendError::CommandFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_nonzero_exit_is_failure() {
        let runner = SystemRunner::new();
        let result = runner.run(&ProbeContext::new(), "false", &[]).await;
        assert!(matches!(result, Err(BackendError::CommandFailed { .. })));
    }

    /// 进程是否仍在运行（僵尸进程视为已退出）
    #[cfg(unix)]
    fn process_alive(pid: &str) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let state = stat.rsplit(')').next().unwrap_or_default().trim_start();
            return !state.starts_with('Z');
        }
        std::process::Command::new("kill")
            .args(["-0", pid])
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("echo $$ > {}; exec sleep 30", pidfile.display());

        let runner = SystemRunner::new();
        let ctx = ProbeContext::with_timeout(Duration::from_millis(300));
        let started = std::time::Instant::now();
        let result = runner.run(&ctx, "sh", &["-c", script.as_str()]).await;
        assert!(matches!(result, Err(BackendError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(4));

        let pid = std::fs::read_to_string(&pidfile).unwrap().trim().to_string();
        assert!(!pid.is_empty());

        let mut alive = true;
        for _ in 0..40 {
            alive = process_alive(&pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "child {} still running after timeout", pid);
    }

    #[cfg(unix)]
    #[test]
    fn test_find_in_path_locates_shell() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-program-xyz").is_none());
    }
}
