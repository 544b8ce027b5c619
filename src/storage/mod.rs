//! 存储协作方：待续计划、对话消息、长期记忆与延迟通知
//!
//! 所有操作都挂在请求级句柄（Storage）上；StorageProvider::open 每次返回独立句柄，
//! 后台任务必须自己 open，不能复用前台请求的句柄。

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;
use crate::notification::Notification;
use crate::pipeline::Plan;

pub use memory::{InMemoryStorage, InMemoryStorageProvider};

/// 长期记忆条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: format!("mem_{}", uuid::Uuid::new_v4()),
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// 请求级存储句柄
#[async_trait]
pub trait Storage: Send + Sync {
    async fn load_plan(&self, conversation_id: &str) -> Result<Option<Plan>, String>;

    async fn save_plan(&self, conversation_id: &str, plan: &Plan) -> Result<(), String>;

    async fn clear_plan(&self, conversation_id: &str) -> Result<(), String>;

    async fn append_message(&self, conversation_id: &str, message: Message) -> Result<(), String>;

    /// 最近 limit 条消息（按时间升序）
    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, String>;

    /// 在 scope（通常是用户）的长期记忆中检索最相关的 limit 条
    async fn search_memories(&self, scope: &str, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String>;

    async fn add_memory(&self, scope: &str, entry: MemoryEntry) -> Result<(), String>;

    /// 存入延迟通知（如后台发现的矛盾），下一轮对话时取出
    async fn push_notice(&self, conversation_id: &str, notice: Notification) -> Result<(), String>;

    /// 取出并清空会话的延迟通知
    async fn take_notices(&self, conversation_id: &str) -> Result<Vec<Notification>, String>;
}

/// 存储句柄工厂
pub trait StorageProvider: Send + Sync {
    /// 每次调用返回新的、独立作用域的句柄
    fn open(&self) -> Arc<dyn Storage>;
}
