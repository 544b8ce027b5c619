//! 通知总线：只追加、可按优先级 / 通道过滤的有序账本
//!
//! 总线本身不做淘汰，保留策略由持有者决定。

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::types::{DeliveryChannel, Notification, NotificationPriority, NotificationSource};

/// 面向客户端的通知表示：payload.data 与 message / title / summary / actions 合并成一个 data 对象
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: NotificationPriority,
    pub channel: DeliveryChannel,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub source: NotificationSource,
    pub data: Map<String, Value>,
}

impl From<&Notification> for TransportNotification {
    fn from(n: &Notification) -> Self {
        let mut data = n.payload.data.clone();
        data.insert("message".into(), Value::String(n.payload.message.clone()));
        if let Some(title) = &n.payload.title {
            data.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(summary) = &n.payload.summary {
            data.insert("summary".into(), Value::String(summary.clone()));
        }
        if !n.payload.actions.is_empty() {
            let actions = serde_json::to_value(&n.payload.actions).unwrap_or(Value::Null);
            data.insert("actions".into(), actions);
        }
        Self {
            id: n.id.clone(),
            kind: n.kind.clone(),
            priority: n.priority,
            channel: n.channel,
            created_at: n.created_at,
            expires_at: n.expires_at,
            source: n.source.clone(),
            data,
        }
    }
}

/// 通知总线
#[derive(Debug, Default)]
pub struct NotificationBus {
    entries: Mutex<Vec<Notification>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 追加并原样返回（不去重）
    pub fn publish(&self, notification: Notification) -> Notification {
        tracing::debug!(
            kind = %notification.kind,
            priority = ?notification.priority,
            "Notification published"
        );
        self.entries().push(notification.clone());
        notification
    }

    pub fn publish_many(&self, notifications: impl IntoIterator<Item = Notification>) -> Vec<Notification> {
        notifications.into_iter().map(|n| self.publish(n)).collect()
    }

    /// 全部通知（按插入顺序）
    pub fn all(&self) -> Vec<Notification> {
        self.entries().clone()
    }

    /// 优先级 ≥ threshold 的通知
    pub fn by_min_priority(&self, threshold: NotificationPriority) -> Vec<Notification> {
        self.entries()
            .iter()
            .filter(|n| n.priority.rank() >= threshold.rank())
            .cloned()
            .collect()
    }

    pub fn by_channel(&self, channel: DeliveryChannel) -> Vec<Notification> {
        self.entries()
            .iter()
            .filter(|n| n.channel == channel)
            .cloned()
            .collect()
    }

    /// 未过期的通知
    pub fn active(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.entries()
            .iter()
            .filter(|n| !n.is_expired(now))
            .cloned()
            .collect()
    }

    /// 客户端表示；min_priority 为 None 时返回全部
    pub fn as_transport(&self, min_priority: Option<NotificationPriority>) -> Vec<TransportNotification> {
        let threshold = min_priority.map(NotificationPriority::rank).unwrap_or(0);
        self.entries()
            .iter()
            .filter(|n| n.priority.rank() >= threshold)
            .map(TransportNotification::from)
            .collect()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationAction;

    fn sample_bus() -> NotificationBus {
        let bus = NotificationBus::new();
        bus.publish(Notification::new("a", "info note"));
        bus.publish(Notification::new("b", "heads up").with_priority(NotificationPriority::High));
        bus.publish(Notification::new("c", "meh").with_priority(NotificationPriority::Low));
        bus.publish(Notification::new("d", "stop").with_priority(NotificationPriority::Critical));
        bus
    }

    #[test]
    fn test_publish_returns_same_notification_and_keeps_order() {
        let bus = NotificationBus::new();
        let n = Notification::new("x", "hello");
        let returned = bus.publish(n.clone());
        assert_eq!(returned, n);
        bus.publish(n.clone());
        assert_eq!(bus.len(), 2);

        let kinds: Vec<_> = sample_bus().all().into_iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_filters() {
        let bus = sample_bus();
        let urgent: Vec<_> = bus
            .by_min_priority(NotificationPriority::High)
            .into_iter()
            .map(|n| n.kind)
            .collect();
        assert_eq!(urgent, vec!["b", "d"]);
        assert_eq!(bus.by_min_priority(NotificationPriority::Info).len(), 4);
        assert_eq!(bus.by_channel(DeliveryChannel::Digest).len(), 1);
        assert_eq!(bus.by_channel(DeliveryChannel::Blocking)[0].kind, "d");

        bus.clear();
        assert!(bus.is_empty());
    }

    #[test]
    fn test_transport_merges_payload_fields() {
        let bus = NotificationBus::new();
        bus.publish(
            Notification::new("contradiction", "You said the opposite last week")
                .with_priority(NotificationPriority::High)
                .with_title("Possible contradiction")
                .with_data("memory_id", "m-1")
                .with_action(NotificationAction::new("review", "Review memory")),
        );
        bus.publish(Notification::new("log", "noise"));

        let transport = bus.as_transport(Some(NotificationPriority::Medium));
        assert_eq!(transport.len(), 1);
        let t = &transport[0];
        assert_eq!(t.priority, NotificationPriority::High);
        assert_eq!(t.data["memory_id"], "m-1");
        assert_eq!(t.data["message"], "You said the opposite last week");
        assert_eq!(t.data["title"], "Possible contradiction");
        assert_eq!(t.data["actions"][0]["id"], "review");
        assert!(t.data.get("summary").is_none());

        let json = serde_json::to_value(t).unwrap();
        assert_eq!(json["type"], "contradiction");
        assert_eq!(json["priority"], "HIGH");

        assert_eq!(bus.as_transport(None).len(), 2);
    }
}
