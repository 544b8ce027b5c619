//! 编排层错误类型
//!
//! 单步失败（工具、模型）在引擎内部被转换为执行记录或降级回复；只有意外的内部错误才会从引擎传出。

use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum HiveError {
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Plan parse error: {0}")]
    PlanParse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}
