//! Mock LLM 客户端（用于测试，无需 API）
//!
//! - MockLlmClient：规划请求一律返回「无需计划」，其余回显最后一条 User 消息
//! - ScriptedLlmClient：按 system / user 内容中的关键词返回预设回复，并记录每次调用

use std::sync::Mutex;

use async_trait::async_trait;

use super::message::{Message, Role};
use super::traits::LlmClient;

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

fn system_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mock 客户端：不做规划，回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let system = system_text(messages);
        if system.contains("[planner]") {
            return Ok(r#"{"needs_plan": false, "reason": "mock client never plans", "steps": []}"#.to_string());
        }
        if system.contains("[confirmation]") {
            return Ok("unrelated".to_string());
        }
        if system.contains("[contradiction]") {
            return Ok(r#"{"contradiction": false}"#.to_string());
        }
        Ok(format!("Echo from Mock: {}", last_user(messages)))
    }
}

enum Reply {
    Text(String),
    Fail(String),
}

/// 脚本化客户端：第一条命中的规则决定回复，未命中时回显
#[derive(Default)]
pub struct ScriptedLlmClient {
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// system 或最后一条 user 消息包含 needle 时返回 reply
    pub fn on(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    /// 命中 needle 时返回错误
    pub fn fail_on(mut self, needle: impl Into<String>, error: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(error.into())));
        self
    }

    /// 已收到的调用（system + user 拼接文本）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let haystack = format!("{}\n{}", system_text(messages), last_user(messages));
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(haystack.clone());
        }
        for (needle, reply) in &self.rules {
            if haystack.contains(needle.as_str()) {
                return match reply {
                    Reply::Text(text) => Ok(text.clone()),
                    Reply::Fail(error) => Err(error.clone()),
                };
            }
        }
        Ok(format!("Echo from Mock: {}", last_user(messages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_never_plans() {
        let client = MockLlmClient;
        let out = client
            .complete(&[Message::system("[planner] decide"), Message::user("hi")])
            .await
            .unwrap();
        assert!(out.contains("\"needs_plan\": false"));

        let out = client.complete(&[Message::user("hello")]).await.unwrap();
        assert_eq!(out, "Echo from Mock: hello");
    }

    #[tokio::test]
    async fn test_scripted_rules_in_order() {
        let client = ScriptedLlmClient::new()
            .fail_on("explode", "boom")
            .on("weather", "sunny");
        assert_eq!(client.complete(&[Message::user("weather?")]).await.unwrap(), "sunny");
        assert_eq!(client.complete(&[Message::user("explode weather")]).await, Err("boom".to_string()));
        assert_eq!(client.calls().len(), 2);
    }
}
