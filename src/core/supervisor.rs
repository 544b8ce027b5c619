//! 后台监管：fire-and-forget 任务，失败只进日志
//!
//! schedule 立即返回，不阻塞调用方；任务结束（成功、出错或 panic）后自动从活跃集合移除。
//! 后台失败永远不会传回前台请求，调用方无需记得自己兜底。

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::task::TaskTracker;

/// 后台任务 ID（仅用于日志关联）
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BackgroundTaskId(u64);

impl std::fmt::Display for BackgroundTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bg-{}", self.0)
    }
}

/// 后台任务监管器
#[derive(Debug, Default)]
pub struct BackgroundSupervisor {
    tracker: TaskTracker,
    next_id: AtomicU64,
}

impl BackgroundSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动后台任务；必须在 tokio 运行时内调用
    pub fn schedule<F>(&self, name: impl Into<String>, work: F) -> BackgroundTaskId
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = BackgroundTaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        tracing::debug!(task = %id, name = %name, "Background task scheduled");

        self.tracker.spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {
                    tracing::debug!(task = %id, name = %name, "Background task completed");
                }
                Ok(Err(e)) => {
                    tracing::error!(task = %id, name = %name, error = %format!("{:#}", e), "Background task failed");
                }
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(task = %id, name = %name, panic = %reason, "Background task panicked");
                }
            }
        });

        id
    }

    /// 当前仍在运行的后台任务数
    pub fn active_count(&self) -> usize {
        self.tracker.len()
    }

    /// 等待所有后台任务结束；超时返回 false。结束后仍可继续 schedule
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        if !drained {
            tracing::warn!(
                active = self.tracker.len(),
                "Background tasks still running after {:?}",
                timeout
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn supervisor_should_panic() -> bool {
        true
    }

    #[tokio::test]
    async fn test_schedule_runs_and_drains() {
        let supervisor = BackgroundSupervisor::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        supervisor.schedule("ok", async move {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        assert!(supervisor.drain(Duration::from_secs(1)).await);
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_and_panic_are_contained() {
        let supervisor = BackgroundSupervisor::new();
        supervisor.schedule("fails", async { Err(anyhow::anyhow!("memory store offline")) });
        supervisor.schedule("panics", async {
            if supervisor_should_panic() {
                panic!("boom");
            }
            Ok(())
        });

        assert!(supervisor.drain(Duration::from_secs(1)).await);
        assert_eq!(supervisor.active_count(), 0);

        // 监管器在失败后仍可使用
        supervisor.schedule("after", async { Ok(()) });
        assert!(supervisor.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_active_count_tracks_running_units() {
        let supervisor = BackgroundSupervisor::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        supervisor.schedule("waits", async move {
            let _ = rx.await;
            Ok(())
        });
        assert_eq!(supervisor.active_count(), 1);
        assert!(!supervisor.drain(Duration::from_millis(20)).await);

        tx.send(()).unwrap();
        assert!(supervisor.drain(Duration::from_secs(1)).await);
        assert_eq!(supervisor.active_count(), 0);
    }
}
