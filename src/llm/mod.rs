//! LLM 层：模型客户端抽象、消息类型与 Mock 实现

pub mod message;
pub mod mock;
pub mod traits;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use traits::LlmClient;
