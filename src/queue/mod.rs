//! 优先级工作队列：阶段之间的延迟 / 异步任务交接

pub mod item;
pub mod store;

pub use item::{WorkItem, WorkItemId, WorkItemUpdate, WorkPriority, WorkStatus};
pub use store::WorkQueue;
