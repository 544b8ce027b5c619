//! 核心：错误类型、后台任务监管、关闭时的清理协调

pub mod error;
pub mod shutdown;
pub mod supervisor;

pub use error::HiveError;
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, SupervisorDrain};
pub use supervisor::{BackgroundSupervisor, BackgroundTaskId};
