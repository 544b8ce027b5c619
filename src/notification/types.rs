//! 通知数据类型：面向用户的结构化提示（区别于面向开发者的遥测）

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 通知优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl NotificationPriority {
    /// CRITICAL=50 … INFO=10
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 50,
            Self::High => 40,
            Self::Medium => 30,
            Self::Low => 20,
            Self::Info => 10,
        }
    }

    /// 高紧急度（HIGH 及以上）
    pub fn is_urgent(self) -> bool {
        self.rank() >= Self::High.rank()
    }

    /// 该优先级建议的投递方式
    pub fn default_channel(self) -> DeliveryChannel {
        match self {
            Self::Critical => DeliveryChannel::Blocking,
            Self::High => DeliveryChannel::Immediate,
            Self::Medium => DeliveryChannel::Async,
            Self::Low => DeliveryChannel::Digest,
            Self::Info => DeliveryChannel::Log,
        }
    }
}

/// 建议的投递通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryChannel {
    /// 必须先处理才能继续
    Blocking,
    Immediate,
    Async,
    /// 汇总后统一推送
    Digest,
    Log,
}

/// 通知来源：产生它的 agent / 功能 / 关联对象
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSource {
    pub agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl NotificationSource {
    pub fn agent(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Self::default()
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_reference(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }
}

/// 建议的后续操作（如「查看」「忽略」）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl NotificationAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

/// 通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: NotificationPriority,
    pub channel: DeliveryChannel,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub source: NotificationSource,
    pub payload: NotificationPayload,
}

impl Notification {
    /// 默认 INFO 优先级，通道随优先级推导
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let priority = NotificationPriority::Info;
        Self {
            id: format!("notif_{}", uuid::Uuid::new_v4()),
            kind: kind.into(),
            priority,
            channel: priority.default_channel(),
            created_at: Utc::now(),
            expires_at: None,
            source: NotificationSource::default(),
            payload: NotificationPayload {
                message: message.into(),
                ..NotificationPayload::default()
            },
        }
    }

    /// 设置优先级，同时把通道换成该优先级的默认通道（之后可用 with_channel 覆盖）
    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self.channel = priority.default_channel();
        self
    }

    pub fn with_channel(mut self, channel: DeliveryChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_source(mut self, source: NotificationSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.payload.title = Some(title.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.payload.summary = Some(summary.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.data.insert(key.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.payload.actions.push(action);
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}
