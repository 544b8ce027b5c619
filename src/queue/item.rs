//! 工作项：阶段之间交接的调度单元

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 工作项 ID
pub type WorkItemId = String;

/// 工作项优先级（CRITICAL > HIGH > MEDIUM > LOW）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl WorkPriority {
    /// 排序用的等级，越大越先执行
    pub fn rank(self) -> u8 {
        match self {
            WorkPriority::Critical => 4,
            WorkPriority::High => 3,
            WorkPriority::Medium => 2,
            WorkPriority::Low => 1,
        }
    }
}

impl Default for WorkPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// 工作项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    /// 等待出队
    Queued,
    /// 已出队，执行中
    InProgress,
    /// 需要用户决定后才能继续
    WaitingUser,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }
}

/// 工作项；kind / origin / id 创建后不可变，priority / status / payload 可更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    id: WorkItemId,
    pub(crate) conversation_id: String,
    #[serde(rename = "type")]
    kind: String,
    origin: String,
    pub priority: WorkPriority,
    pub status: WorkStatus,
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 入队序号，created_at 相同时保证先入先出
    #[serde(default)]
    pub(crate) seq: u64,
}

impl WorkItem {
    pub fn new(
        conversation_id: impl Into<String>,
        kind: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("work_{}", uuid::Uuid::new_v4()),
            conversation_id: conversation_id.into(),
            kind: kind.into(),
            origin: origin.into(),
            priority: WorkPriority::default(),
            status: WorkStatus::Queued,
            payload: Map::new(),
            created_at: now,
            updated_at: now,
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: WorkPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: WorkStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// 追加单个 payload 字段
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// 浅合并 payload（同名键覆盖）并刷新更新时间
    pub(crate) fn merge_payload(&mut self, fields: Map<String, Value>) {
        for (k, v) in fields {
            self.payload.insert(k, v);
        }
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// update 的可选字段；None 表示不修改
#[derive(Debug, Clone, Default)]
pub struct WorkItemUpdate {
    pub status: Option<WorkStatus>,
    pub priority: Option<WorkPriority>,
    pub payload: Map<String, Value>,
}

impl WorkItemUpdate {
    pub fn status(status: WorkStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: WorkPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}
