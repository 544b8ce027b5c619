//! Hive - 多阶段对话流水线的编排与协调核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、后台任务监管、关闭清理
//! - **llm**: 模型客户端抽象与 Mock 实现
//! - **notification**: 面向用户的通知与通知总线
//! - **observability**: tracing 日志初始化
//! - **pipeline**: 计划状态机、阶段遥测、流水线引擎、会话运行时
//! - **queue**: 按会话划分的优先级工作队列
//! - **storage**: 请求级存储抽象与内存实现
//! - **telemetry**: 阶段进度事件与按会话的广播器
//! - **tools**: 工具注册表与带超时的执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod notification;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod telemetry;
pub mod tools;

pub use crate::core::{BackgroundSupervisor, HiveError};
pub use pipeline::{ConversationRuntime, PipelineDeps, PipelineEngine, TurnRequest, TurnResponse};
