// 首次连接策略
// 判断一个未知主机的公钥是否接受；公钥不一致时从不询问策略

use std::io::{self, BufRead, Write};

use async_trait::async_trait;

use super::error::{TrustError, TrustResult};
use super::fingerprint::Fingerprint;

/// 首次连接请求
#[derive(Clone, Debug)]
pub struct FirstContact {
    pub host: String,
    pub algorithm: String,
    pub fingerprint: Fingerprint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// 首次连接策略
#[async_trait]
pub trait FirstContactPolicy: Send + Sync {
    async fn decide(&self, request: &FirstContact) -> TrustResult<Decision>;
}

/// 在终端显示指纹并询问用户
#[derive(Clone, Copy, Debug, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl FirstContactPolicy for TerminalPrompt {
    async fn decide(&self, request: &FirstContact) -> TrustResult<Decision> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            let stderr = io::stderr();
            prompt(&request, &mut stdin.lock(), &mut stderr.lock())
        })
        .await
        .map_err(|e| TrustError::Prompt(e.to_string()))?
        .map_err(|e| TrustError::Prompt(e.to_string()))
    }
}

/// 批处理模式：拒绝所有未知主机
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectUnknown;

#[async_trait]
impl FirstContactPolicy for RejectUnknown {
    async fn decide(&self, request: &FirstContact) -> TrustResult<Decision> {
        tracing::warn!(
            "[Trust] Refusing unknown host {} ({} {})",
            request.host,
            request.algorithm,
            request.fingerprint.sha256()
        );
        Ok(Decision::Reject)
    }
}

/// 自动接受未知主机（已知主机公钥不一致时仍然失败）
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptNew;

#[async_trait]
impl FirstContactPolicy for AcceptNew {
    async fn decide(&self, _request: &FirstContact) -> TrustResult<Decision> {
        Ok(Decision::Accept)
    }
}

/// 询问一次；输入 yes、no 或完整的 SHA256 指纹
pub fn prompt<R: BufRead, W: Write>(
    request: &FirstContact,
    input: &mut R,
    output: &mut W,
) -> io::Result<Decision> {
    writeln!(
        output,
        "The authenticity of host '{}' can't be established.",
        request.host
    )?;
    writeln!(
        output,
        "{} key fingerprint is {}.",
        request.algorithm, request.fingerprint
    )?;
    write!(
        output,
        "Are you sure you want to continue connecting (yes/no/[fingerprint])? "
    )?;
    output.flush()?;

    let expected = request.fingerprint.sha256();
    loop {
        let mut answer = String::new();
        if input.read_line(&mut answer)? == 0 {
            writeln!(output)?;
            return Ok(Decision::Reject);
        }
        let answer = answer.trim();
        if answer.eq_ignore_ascii_case("yes") || answer == expected {
            return Ok(Decision::Accept);
        }
        if answer.eq_ignore_ascii_case("no") {
            return Ok(Decision::Reject);
        }
        write!(output, "Please type 'yes', 'no' or the fingerprint: ")?;
        output.flush()?;
    }
}
