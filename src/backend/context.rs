// 探测上下文
// 携带取消令牌和可选截止时间，所有 backend 操作都在其约束下执行

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{BackendError, BackendResult};

/// 可取消、带超时的探测上下文
#[derive(Clone, Debug, Default)]
pub struct ProbeContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ProbeContext {
    /// 无超时的根上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 带超时的根上下文
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// 派生子上下文：父级取消时一同取消，截止时间取两者较早者
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < candidate => parent,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// 派生只继承取消的子上下文
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// 取消该上下文及其所有子上下文
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// 截止时间
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 当前是否已取消或超时
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// 已结束时返回对应错误
    pub fn err(&self) -> Option<BackendError> {
        if self.token.is_cancelled() {
            Some(BackendError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(BackendError::Timeout)
        } else {
            None
        }
    }

    /// 等待上下文结束，返回结束原因
    pub async fn done(&self) -> BackendError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => BackendError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => BackendError::Timeout,
            },
            None => {
                self.token.cancelled().await;
                BackendError::Cancelled
            }
        }
    }

    /// 在上下文约束下执行 future
    /// 上下文先结束时丢弃 future（进程由 kill_on_drop 终止）
    pub async fn run<T, F>(&self, fut: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_before_deadline() {
        let ctx = ProbeContext::with_timeout(Duration::from_secs(5));
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let ctx = ProbeContext::with_timeout(Duration::from_millis(20));
        let result: BackendResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BackendError::Timeout)));
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = ProbeContext::new();
        let child = parent.child_with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_done());
        assert!(matches!(child.err(), Some(BackendError::Cancelled)));
    }

    #[test]
    fn test_child_keeps_earlier_deadline() {
        let parent = ProbeContext::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
