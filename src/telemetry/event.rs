//! 遥测事件：各阶段开始 / 完成 / 等待 / 出错时发布，可序列化为 JSON 供前端展示

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 阶段状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Started,
    Completed,
    Waiting,
    Error,
}

/// 单条遥测事件；extra 中的字段与固定字段平铺在同一个 JSON 对象里
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub agent_id: String,
    pub agent_name: String,
    pub status: AgentStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            status,
            timestamp: Utc::now(),
            extra: Map::new(),
        }
    }

    pub fn started(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self::new(agent_id, agent_name, AgentStatus::Started)
    }

    pub fn completed(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self::new(agent_id, agent_name, AgentStatus::Completed)
    }

    pub fn waiting(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self::new(agent_id, agent_name, AgentStatus::Waiting)
    }

    /// 出错事件，错误文本写入 extra.error
    pub fn error(
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::new(agent_id, agent_name, AgentStatus::Error).with_field("error", error.into())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn with_message(self, message: impl Into<String>) -> Self {
        self.with_field("message", message.into())
    }

    /// 用于 JSON 传输的对象（时间戳为 ISO-8601）
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
