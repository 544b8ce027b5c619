//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时；execute 在超时内调用工具，失败、超时、未知工具都转为失败的执行记录，
//! 不会中断调用方的循环。每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::core::HiveError;
use crate::tools::ToolRegistry;

/// 单次工具调用的结构化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool: String,
    pub inputs: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToolExecution {
    fn ok(tool: &str, inputs: Value, result: Value, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            inputs,
            result: Some(result),
            error: None,
            success: true,
            duration_ms,
        }
    }

    fn failed(tool: &str, inputs: Value, error: &HiveError, duration_ms: u64) -> Self {
        Self {
            tool: tool.to_string(),
            inputs,
            result: None,
            error: Some(error.to_string()),
            success: false,
            duration_ms,
        }
    }
}

/// 工具执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；原始结果，错误映射为 HiveError
    pub async fn call(&self, tool_name: &str, args: Value) -> Result<Value, HiveError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| HiveError::UnknownTool(tool_name.to_string()))?;
        match timeout(self.timeout, tool.execute(args)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(HiveError::ToolExecutionFailed(e)),
            Err(_) => Err(HiveError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 执行并生成执行记录；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, inputs: Value) -> ToolExecution {
        let start = Instant::now();
        let preview = args_preview(&inputs);
        let result = self.call(tool_name, inputs.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(HiveError::ToolTimeout(_)) => "timeout",
            Err(HiveError::UnknownTool(_)) => "unknown_tool",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(value) => ToolExecution::ok(tool_name, inputs, value, duration_ms),
            Err(e) => ToolExecution::failed(tool_name, inputs, &e, duration_ms),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
