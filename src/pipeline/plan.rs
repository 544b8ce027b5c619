//! 多步计划：跨轮次保存，可在 wait_user 步骤暂停等待用户确认
//!
//! 计划本身不持久化，暂停时随 TurnResponse 交给调用方保存，下一轮再通过 TurnRequest 传回。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 步骤动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// 调用指定工具
    Tool,
    /// 汇总已有工具结果并回复
    Respond,
    /// 暂停，等待用户确认
    WaitUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(default)]
    pub description: String,
    pub action: StepAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default = "empty_inputs")]
    pub inputs: Value,
    /// 失败时是否终止后续步骤
    #[serde(default)]
    pub require_success: bool,
}

fn empty_inputs() -> Value {
    Value::Object(serde_json::Map::new())
}

impl PlanStep {
    pub fn tool(description: impl Into<String>, tool: impl Into<String>, inputs: Value) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Tool,
            tool: Some(tool.into()),
            inputs,
            require_success: false,
        }
    }

    pub fn respond(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            action: StepAction::Respond,
            tool: None,
            inputs: empty_inputs(),
            require_success: false,
        }
    }

    pub fn wait_user(question: impl Into<String>) -> Self {
        Self {
            description: question.into(),
            action: StepAction::WaitUser,
            tool: None,
            inputs: empty_inputs(),
            require_success: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.require_success = true;
        self
    }
}

/// 计划来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    /// 规划阶段自动生成
    Auto,
    /// 调用方要求强制联网搜索
    ForcedSearch,
    /// 调用方直接提供
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub steps: Vec<PlanStep>,
    pub current_step: usize,
    /// 被新的、无关的用户消息作废
    pub dirty: bool,
    pub completed: bool,
    pub origin: PlanOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>, origin: PlanOrigin) -> Self {
        Self {
            id: format!("plan_{}", uuid::Uuid::new_v4()),
            steps,
            current_step: 0,
            dirty: false,
            completed: false,
            origin,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// 当前待执行的步骤
    pub fn current(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step)
    }

    /// 仍可继续执行（未作废、未完成、还有步骤）
    pub fn is_pending(&self) -> bool {
        !self.dirty && !self.completed && self.current_step < self.steps.len()
    }

    /// 停在 wait_user 步骤上等待确认
    pub fn is_waiting_user(&self) -> bool {
        self.is_pending()
            && self
                .current()
                .map(|s| s.action == StepAction::WaitUser)
                .unwrap_or(false)
    }

    pub fn advance(&mut self) {
        if self.current_step < self.steps.len() {
            self.current_step += 1;
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.current_step = self.steps.len();
    }

    /// 尚未执行的步骤中是否已有调用 tool 的步骤
    pub fn has_pending_tool_step(&self, tool: &str) -> bool {
        self.steps
            .iter()
            .skip(self.current_step)
            .any(|s| s.action == StepAction::Tool && s.tool.as_deref() == Some(tool))
    }

    /// 在当前位置插入步骤（下一个执行）
    pub fn insert_next(&mut self, step: PlanStep) {
        let at = self.current_step.min(self.steps.len());
        self.steps.insert(at, step);
    }

    pub fn step_descriptions(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.description.clone()).collect()
    }
}
