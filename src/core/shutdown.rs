//! 优雅关闭：退出前依次执行清理任务
//!
//! 典型用法是注册 SupervisorDrain，让尚未结束的后台分析（矛盾检测等）有机会写完结果。

use std::sync::Arc;
use std::time::Duration;

use crate::config::SupervisorSection;
use crate::core::BackgroundSupervisor;

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    /// 执行清理，返回清理是否成功
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：管理多个清理任务
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时时间（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    /// 设置清理超时时间
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// 注册清理任务
    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 依次执行清理任务，返回成功的数量；失败与超时只记日志
    pub async fn run_cleanup(&self) -> usize {
        tracing::info!(tasks = self.cleanup_tasks.len(), "Running shutdown cleanup");

        let timeout = Duration::from_secs(self.timeout_secs);
        let mut succeeded = 0;

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    succeeded += 1;
                    tracing::info!(task = name, "Cleanup finished");
                }
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %format!("{:#}", e), "Cleanup failed");
                }
                Err(_) => {
                    tracing::warn!(task = name, timeout_secs = self.timeout_secs, "Cleanup timed out");
                }
            }
        }

        succeeded
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待后台监管器中的任务全部结束
pub struct SupervisorDrain {
    supervisor: Arc<BackgroundSupervisor>,
    timeout: Duration,
}

impl SupervisorDrain {
    pub fn new(supervisor: Arc<BackgroundSupervisor>, timeout: Duration) -> Self {
        Self { supervisor, timeout }
    }

    /// 等待时长取 [supervisor] drain_timeout_secs
    pub fn from_config(supervisor: Arc<BackgroundSupervisor>, config: &SupervisorSection) -> Self {
        Self::new(supervisor, Duration::from_secs(config.drain_timeout_secs))
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SupervisorDrain {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if self.supervisor.drain(self.timeout).await {
            Ok(())
        } else {
            anyhow::bail!(
                "{} background tasks still running",
                self.supervisor.active_count()
            )
        }
    }

    fn name(&self) -> &'static str {
        "BackgroundSupervisor"
    }
}
