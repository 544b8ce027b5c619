//! 流水线阶段与每轮遥测记录
//!
//! 每个阶段进入 / 退出都会发布事件（即使本轮什么也没做），整轮再由 orchestrator 事件包裹。

use serde_json::Value;

use crate::telemetry::{TelemetryBroker, TelemetryEvent};

pub const ORCHESTRATOR_ID: &str = "orchestrator";
pub const ORCHESTRATOR_NAME: &str = "Orchestrator";

/// 固定顺序的流水线阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Intake,
    Routing,
    ToolExecution,
    KnowledgeRetrieval,
    NotificationCollection,
    ResponseFormatting,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Intake,
        Stage::Routing,
        Stage::ToolExecution,
        Stage::KnowledgeRetrieval,
        Stage::NotificationCollection,
        Stage::ResponseFormatting,
    ];

    pub fn agent_id(self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Routing => "router",
            Stage::ToolExecution => "tool_executor",
            Stage::KnowledgeRetrieval => "knowledge",
            Stage::NotificationCollection => "notifications",
            Stage::ResponseFormatting => "formatter",
        }
    }

    pub fn agent_name(self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::Routing => "Router",
            Stage::ToolExecution => "Tool Executor",
            Stage::KnowledgeRetrieval => "Knowledge Retrieval",
            Stage::NotificationCollection => "Notification Collector",
            Stage::ResponseFormatting => "Response Formatter",
        }
    }
}

/// 单轮遥测：发布到广播器，同时留一份给本轮回复
pub(crate) struct TurnTelemetry<'a> {
    broker: &'a TelemetryBroker,
    conversation_id: &'a str,
    captured: Vec<TelemetryEvent>,
}

impl<'a> TurnTelemetry<'a> {
    pub(crate) fn new(broker: &'a TelemetryBroker, conversation_id: &'a str) -> Self {
        Self {
            broker,
            conversation_id,
            captured: Vec::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: TelemetryEvent) {
        self.broker.publish(self.conversation_id, event.clone());
        self.captured.push(event);
    }

    pub(crate) fn started(&mut self, stage: Stage) {
        self.emit(TelemetryEvent::started(stage.agent_id(), stage.agent_name()));
    }

    pub(crate) fn completed(&mut self, stage: Stage, fields: Vec<(&str, Value)>) {
        let mut event = TelemetryEvent::completed(stage.agent_id(), stage.agent_name());
        for (key, value) in fields {
            event = event.with_field(key, value);
        }
        self.emit(event);
    }

    pub(crate) fn waiting(&mut self, stage: Stage, message: &str) {
        self.emit(TelemetryEvent::waiting(stage.agent_id(), stage.agent_name()).with_message(message));
    }

    pub(crate) fn failed(&mut self, agent_id: &str, agent_name: &str, error: &str) {
        self.emit(TelemetryEvent::error(agent_id, agent_name, error));
    }

    pub(crate) fn into_events(self) -> Vec<TelemetryEvent> {
        self.captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::AgentStatus;

    #[test]
    fn test_turn_telemetry_publishes_and_captures() {
        let broker = TelemetryBroker::default();
        let sub = broker.register("c1");
        let mut telemetry = TurnTelemetry::new(&broker, "c1");

        telemetry.started(Stage::Routing);
        telemetry.completed(Stage::Routing, vec![("route", Value::from("direct"))]);

        let events = telemetry.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, AgentStatus::Completed);
        assert_eq!(events[1].extra["route"], "direct");
        assert_eq!(sub.drain(), events);
        assert_eq!(broker.snapshot("c1"), events);
    }

    #[test]
    fn test_agent_ids_are_unique() {
        let mut ids: Vec<_> = Stage::ALL.iter().map(|s| s.agent_id()).collect();
        ids.push(ORCHESTRATOR_ID);
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }
}
