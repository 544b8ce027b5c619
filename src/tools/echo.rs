//! 回显工具：把 text 参数原样返回，缺少参数时报错（测试与演示用）

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::Tool;

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged. Args: {\"text\": string}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        match args.get("text").and_then(Value::as_str) {
            Some(text) => Ok(json!({ "text": text })),
            None => Err("missing 'text' argument".to_string()),
        }
    }
}
