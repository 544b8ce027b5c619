//! 模型 / 生成服务抽象
//!
//! 引擎把模型当作不透明的远程调用：给定上下文，返回生成文本或错误字符串。超时由实现自行处理。

use async_trait::async_trait;

use super::message::Message;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
