//! 内存存储实现：多个句柄共享同一份状态（适合测试与单进程部署）
//!
//! 长期记忆检索按关键词重叠打分（无真实向量）。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MemoryEntry, Storage, StorageProvider};
use crate::llm::Message;
use crate::notification::Notification;
use crate::pipeline::Plan;

#[derive(Debug, Default)]
struct SharedState {
    plans: HashMap<String, Plan>,
    messages: HashMap<String, Vec<Message>>,
    memories: HashMap<String, Vec<MemoryEntry>>,
    notices: HashMap<String, Vec<Notification>>,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// 单个请求级句柄
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    state: Arc<RwLock<SharedState>>,
    handle_id: u64,
}

impl InMemoryStorage {
    /// 句柄编号（每次 open 递增，用于确认后台任务拿到的是新句柄）
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn load_plan(&self, conversation_id: &str) -> Result<Option<Plan>, String> {
        Ok(self.state.read().await.plans.get(conversation_id).cloned())
    }

    async fn save_plan(&self, conversation_id: &str, plan: &Plan) -> Result<(), String> {
        self.state
            .write()
            .await
            .plans
            .insert(conversation_id.to_string(), plan.clone());
        Ok(())
    }

    async fn clear_plan(&self, conversation_id: &str) -> Result<(), String> {
        self.state.write().await.plans.remove(conversation_id);
        Ok(())
    }

    async fn append_message(&self, conversation_id: &str, message: Message) -> Result<(), String> {
        self.state
            .write()
            .await
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, String> {
        let state = self.state.read().await;
        let messages = state.messages.get(conversation_id).map(Vec::as_slice).unwrap_or(&[]);
        Ok(messages[messages.len().saturating_sub(limit)..].to_vec())
    }

    async fn search_memories(&self, scope: &str, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        let query_tokens = tokenize_lower(query);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let Some(entries) = state.memories.get(scope) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<(usize, &MemoryEntry)> = entries
            .iter()
            .map(|e| (query_tokens.intersection(&tokenize_lower(&e.text)).count(), e))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn add_memory(&self, scope: &str, entry: MemoryEntry) -> Result<(), String> {
        if entry.text.trim().is_empty() {
            return Ok(());
        }
        self.state
            .write()
            .await
            .memories
            .entry(scope.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn push_notice(&self, conversation_id: &str, notice: Notification) -> Result<(), String> {
        self.state
            .write()
            .await
            .notices
            .entry(conversation_id.to_string())
            .or_default()
            .push(notice);
        Ok(())
    }

    async fn take_notices(&self, conversation_id: &str) -> Result<Vec<Notification>, String> {
        Ok(self
            .state
            .write()
            .await
            .notices
            .remove(conversation_id)
            .unwrap_or_default())
    }
}

/// 内存存储工厂
#[derive(Debug, Default)]
pub struct InMemoryStorageProvider {
    state: Arc<RwLock<SharedState>>,
    opened: AtomicU64,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已打开的句柄总数
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// 具体类型的句柄（测试中预置数据用）
    pub fn handle(&self) -> InMemoryStorage {
        let handle_id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        InMemoryStorage {
            state: Arc::clone(&self.state),
            handle_id,
        }
    }
}

impl StorageProvider for InMemoryStorageProvider {
    fn open(&self) -> Arc<dyn Storage> {
        Arc::new(self.handle())
    }
}
