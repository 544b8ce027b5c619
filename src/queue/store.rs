//! 按会话划分的优先级工作队列（内存版，进程退出即丢失）
//!
//! 排序规则：优先级降序，再按 created_at 升序，最后按入队序号；所有「挑一个」的操作都用这一规则。
//! 不存在的会话或工作项一律返回 None / 空列表，不报错。

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::item::{WorkItem, WorkItemId, WorkItemUpdate, WorkStatus};

/// 出队顺序比较：-rank，created_at，seq
fn queue_order(a: &WorkItem, b: &WorkItem) -> CmpOrdering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

fn sorted(mut items: Vec<WorkItem>) -> Vec<WorkItem> {
    items.sort_by(queue_order);
    items
}

/// 优先级工作队列
#[derive(Debug, Default)]
pub struct WorkQueue {
    conversations: RwLock<HashMap<String, Vec<WorkItem>>>,
    next_seq: AtomicU64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队；工作项归属于 conversation_id（覆盖 item 自带的会话）
    pub async fn enqueue(&self, conversation_id: &str, item: WorkItem) -> WorkItemId {
        let mut item = item;
        item.conversation_id = conversation_id.to_string();
        item.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = item.id().to_string();

        tracing::debug!(
            conversation = conversation_id,
            item = %id,
            kind = item.kind(),
            priority = ?item.priority,
            "Work item enqueued"
        );

        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(item);
        id
    }

    /// 取出优先级最高、最早创建的 QUEUED 项并标记为 IN_PROGRESS
    pub async fn start_next(&self, conversation_id: &str) -> Option<WorkItem> {
        let mut conversations = self.conversations.write().await;
        let items = conversations.get_mut(conversation_id)?;

        let next = items
            .iter_mut()
            .filter(|item| item.status == WorkStatus::Queued)
            .min_by(|a, b| queue_order(a, b))?;

        next.status = WorkStatus::InProgress;
        next.touch();
        Some(next.clone())
    }

    pub async fn get(&self, conversation_id: &str, item_id: &str) -> Option<WorkItem> {
        self.conversations
            .read()
            .await
            .get(conversation_id)?
            .iter()
            .find(|item| item.id() == item_id)
            .cloned()
    }

    /// 按状态查找，按出队顺序排列
    pub async fn find_by_status(&self, conversation_id: &str, status: WorkStatus) -> Vec<WorkItem> {
        self.find(conversation_id, |item| item.status == status).await
    }

    /// 按类型查找，按出队顺序排列
    pub async fn find_by_type(&self, conversation_id: &str, kind: &str) -> Vec<WorkItem> {
        self.find(conversation_id, |item| item.kind() == kind).await
    }

    /// 指定类型中尚未结束、排序最靠前的一项
    pub async fn find_next_by_type(&self, conversation_id: &str, kind: &str) -> Option<WorkItem> {
        self.find(conversation_id, |item| {
            item.kind() == kind && !item.status.is_terminal()
        })
        .await
        .into_iter()
        .next()
    }

    async fn find<P>(&self, conversation_id: &str, predicate: P) -> Vec<WorkItem>
    where
        P: Fn(&WorkItem) -> bool,
    {
        let conversations = self.conversations.read().await;
        let Some(items) = conversations.get(conversation_id) else {
            return Vec::new();
        };
        sorted(items.iter().filter(|item| predicate(*item)).cloned().collect())
    }

    /// 修改状态 / 优先级并合并 payload
    pub async fn update(
        &self,
        conversation_id: &str,
        item_id: &str,
        update: WorkItemUpdate,
    ) -> Option<WorkItem> {
        let mut conversations = self.conversations.write().await;
        let item = conversations
            .get_mut(conversation_id)?
            .iter_mut()
            .find(|item| item.id() == item_id)?;

        if let Some(status) = update.status {
            item.status = status;
        }
        if let Some(priority) = update.priority {
            item.priority = priority;
        }
        item.merge_payload(update.payload);
        Some(item.clone())
    }

    /// 标记完成并合并结果字段
    pub async fn complete(
        &self,
        conversation_id: &str,
        item_id: &str,
        result: Map<String, Value>,
    ) -> Option<WorkItem> {
        let update = WorkItemUpdate {
            status: Some(WorkStatus::Completed),
            priority: None,
            payload: result,
        };
        self.update(conversation_id, item_id, update).await
    }

    /// 标记失败，错误写入 payload.error
    pub async fn fail(&self, conversation_id: &str, item_id: &str, error: &str) -> Option<WorkItem> {
        let update = WorkItemUpdate::status(WorkStatus::Failed).with_field("error", error);
        self.update(conversation_id, item_id, update).await
    }

    /// 清除会话中所有 COMPLETED 项，返回清除数量；会话空了则一并移除
    pub async fn clear_completed(&self, conversation_id: &str) -> usize {
        let mut conversations = self.conversations.write().await;
        let Some(items) = conversations.get_mut(conversation_id) else {
            return 0;
        };
        let before = items.len();
        items.retain(|item| item.status != WorkStatus::Completed);
        let removed = before - items.len();
        if items.is_empty() {
            conversations.remove(conversation_id);
        }
        if removed > 0 {
            tracing::debug!(conversation = conversation_id, removed, "Purged completed work items");
        }
        removed
    }

    /// 会话中的工作项数量（含已结束）
    pub async fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 有工作项的会话列表
    pub async fn conversations(&self) -> Vec<String> {
        self.conversations.read().await.keys().cloned().collect()
    }
}
