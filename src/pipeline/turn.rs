//! 单轮请求 / 回复类型，以及通知生产方 trait

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::plan::Plan;
use crate::notification::{Notification, TransportNotification};
use crate::storage::MemoryEntry;
use crate::telemetry::TelemetryEvent;
use crate::tools::ToolExecution;

/// 一轮对话的输入
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    /// 长期记忆的作用域；为空时按会话划分
    pub user_id: Option<String>,
    pub message: String,
    /// 调用方要求本轮联网搜索
    pub force_web_search: bool,
    /// 上一轮暂停时保存下来的计划
    pub pending_plan: Option<Plan>,
}

impl TurnRequest {
    pub fn new(conversation_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_id: None,
            message: message.into(),
            force_web_search: false,
            pending_plan: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_force_web_search(mut self, force: bool) -> Self {
        self.force_web_search = force;
        self
    }

    pub fn with_pending_plan(mut self, plan: Option<Plan>) -> Self {
        self.pending_plan = plan;
        self
    }

    pub fn memory_scope(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.conversation_id)
    }
}

/// 路由结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// 直接回复
    Direct,
    NewPlan,
    /// 用户确认后继续执行暂停的计划
    ResumedPlan,
    /// 用户明确拒绝，计划取消
    CancelledPlan,
}

/// 路由元数据：对外暴露本轮为什么这样处理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingMetadata {
    pub route: RouteKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    /// 被本轮作废的计划 id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discarded_plan: Option<String>,
    /// 强制搜索是否生效
    pub force_search: bool,
    /// 规划失败时的错误（已降级为直接回复）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_error: Option<String>,
}

impl RoutingMetadata {
    pub(crate) fn direct() -> Self {
        Self {
            route: RouteKind::Direct,
            reason: None,
            steps: Vec::new(),
            discarded_plan: None,
            force_search: false,
            fallback_error: None,
        }
    }
}

/// 本轮使用的长期记忆
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub retrieved: usize,
    pub entries: Vec<MemoryEntry>,
}

/// 本轮产生的通知汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationSummary {
    pub count: usize,
    /// HIGH 及以上
    pub urgent: Vec<TransportNotification>,
    pub all: Vec<TransportNotification>,
}

/// 一轮对话的输出
#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub response: String,
    pub memory: MemoryUsage,
    pub tools_used: Vec<String>,
    pub tool_details: Vec<ToolExecution>,
    pub notifications: NotificationSummary,
    pub telemetry: Vec<TelemetryEvent>,
    /// 本轮的计划（暂停中或已完成）；调用方只需保存暂停中的。计划作废或被标记 dirty 时为 None
    pub plan: Option<Plan>,
    pub plan_completed: bool,
    pub awaiting_confirmation: bool,
    pub routing: RoutingMetadata,
}

/// 提供给通知生产方的本轮上下文
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub message: String,
    pub tool_details: Vec<ToolExecution>,
    pub awaiting_confirmation: bool,
}

/// 通知生产方：通知收集阶段依次调用
#[async_trait]
pub trait NotificationProducer: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self, context: &TurnContext) -> Vec<Notification>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_scope_falls_back_to_conversation() {
        let request = TurnRequest::new("c1", "hi");
        assert_eq!(request.memory_scope(), "c1");
        assert_eq!(request.with_user("u9").memory_scope(), "u9");
    }

    #[test]
    fn test_routing_serialization() {
        let routing = RoutingMetadata {
            route: RouteKind::ResumedPlan,
            ..RoutingMetadata::direct()
        };
        let value = serde_json::to_value(&routing).unwrap();
        assert_eq!(value["route"], "resumed_plan");
        assert!(value.get("reason").is_none());
    }
}
