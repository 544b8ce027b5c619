//! 传输信封：推送给 UI 的实时更新格式
//!
//! `{"type": "event", "event": {...}}` 或 `{"type": "snapshot", "events": [...]}`

use serde::{Deserialize, Serialize};

use super::event::TelemetryEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryEnvelope {
    /// 单条实时事件
    Event { event: TelemetryEvent },
    /// 新连接时的历史回放
    Snapshot { events: Vec<TelemetryEvent> },
}

impl TelemetryEnvelope {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<TelemetryEvent> for TelemetryEnvelope {
    fn from(event: TelemetryEvent) -> Self {
        TelemetryEnvelope::Event { event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let event = TelemetryEvent::completed("router", "Router").with_field("plan", true);
        let json: serde_json::Value =
            serde_json::from_str(&TelemetryEnvelope::from(event.clone()).to_json()).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["agent_id"], "router");
        assert_eq!(json["event"]["status"], "completed");
        assert_eq!(json["event"]["plan"], true);

        let snapshot = TelemetryEnvelope::Snapshot { events: vec![event] };
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json()).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["events"].as_array().map(Vec::len), Some(1));
    }
}
