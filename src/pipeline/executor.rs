//! 工具执行循环：按顺序执行计划步骤
//!
//! tool 步骤失败只记录为失败的执行记录，除非该步骤 require_success；
//! wait_user 步骤让循环停在该步骤上，计划交回调用方保存；respond 步骤结束循环并进入汇总。

use serde_json::Value;

use super::plan::{Plan, StepAction};
use super::stage::TurnTelemetry;
use crate::telemetry::TelemetryEvent;
use crate::tools::{ToolExecution, ToolExecutor};

/// 循环结束的原因
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// 没有可执行的计划
    NoPlan,
    /// 停在 wait_user 步骤，question 为要问用户的话
    Paused { question: String },
    /// 遇到 respond 步骤或步骤全部执行完毕
    Respond,
    /// require_success 的步骤失败
    Aborted { step: usize, error: String },
}

#[derive(Debug, Clone)]
pub struct LoopResult {
    pub outcome: LoopOutcome,
    pub executions: Vec<ToolExecution>,
}

impl LoopResult {
    fn new(outcome: LoopOutcome, executions: Vec<ToolExecution>) -> Self {
        Self { outcome, executions }
    }
}

fn tool_agent_id(tool: &str) -> String {
    format!("tool.{}", tool)
}

/// 从 plan.current_step 开始执行，直到暂停、回复或中止
pub(crate) async fn run_plan(
    plan: &mut Plan,
    tools: &ToolExecutor,
    telemetry: &mut TurnTelemetry<'_>,
) -> LoopResult {
    let mut executions = Vec::new();
    if !plan.is_pending() {
        return LoopResult::new(LoopOutcome::NoPlan, executions);
    }

    while let Some(step) = plan.current().cloned() {
        match step.action {
            StepAction::WaitUser => {
                tracing::info!(plan = %plan.id, step = plan.current_step, "Plan paused for confirmation");
                return LoopResult::new(
                    LoopOutcome::Paused {
                        question: step.description,
                    },
                    executions,
                );
            }
            StepAction::Respond => {
                plan.mark_completed();
                return LoopResult::new(LoopOutcome::Respond, executions);
            }
            StepAction::Tool => {
                let tool = step.tool.clone().unwrap_or_default();
                let agent_id = tool_agent_id(&tool);
                telemetry.emit(TelemetryEvent::started(&agent_id, &tool));

                let record = tools.execute(&tool, step.inputs.clone()).await;
                if record.success {
                    telemetry.emit(
                        TelemetryEvent::completed(&agent_id, &tool)
                            .with_field("duration_ms", Value::from(record.duration_ms)),
                    );
                } else {
                    let error = record.error.clone().unwrap_or_default();
                    tracing::warn!(tool = %tool, step = plan.current_step, error = %error, "Plan step failed");
                    telemetry.failed(&agent_id, &tool, &error);
                }

                let failed = !record.success;
                executions.push(record);
                if failed && step.require_success {
                    let index = plan.current_step;
                    let error = executions
                        .last()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_default();
                    plan.mark_dirty();
                    return LoopResult::new(LoopOutcome::Aborted { step: index, error }, executions);
                }
                plan.advance();
            }
        }
    }

    plan.mark_completed();
    LoopResult::new(LoopOutcome::Respond, executions)
}
