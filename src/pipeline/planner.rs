//! Planner：判断请求是否需要多步计划，并解析模型给出的 JSON 计划
//!
//! 模型输出可能是 ```json 代码块或夹在文字里的 JSON；extract_json 负责取出第一个对象。
//! 解析失败或模型出错都由调用方降级为直接回复。

use std::sync::Arc;

use serde::Deserialize;

use super::intent::ReplyKind;
use super::plan::{Plan, PlanOrigin, PlanStep, StepAction};
use crate::core::HiveError;
use crate::llm::{LlmClient, Message};
use crate::tools::ToolRegistry;

pub const PLANNER_PROMPT: &str = "[planner] You decide whether the user's request needs a multi-step plan. \
Reply with JSON only: {\"needs_plan\": bool, \"reason\": string, \"steps\": [{\"description\": string, \
\"action\": \"tool\" | \"respond\" | \"wait_user\", \"tool\": string, \"inputs\": object}]}. \
Use wait_user before any step the user should approve. Simple questions need no plan.";

pub const CONFIRMATION_PROMPT: &str = "[confirmation] The assistant asked the user a confirmation question. \
Classify the user's reply. Answer with exactly one word: confirm, decline, or unrelated.";

/// 从模型输出中取出 JSON 对象文本
pub(crate) fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    needs_plan: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    steps: Vec<PlanStep>,
}

/// 解析规划输出：无需计划返回 None；结构错误返回 PlanParse
pub fn parse_plan_output(output: &str, max_steps: usize) -> Result<Option<Plan>, HiveError> {
    let json = extract_json(output).ok_or_else(|| HiveError::PlanParse(format!("no JSON in: {output}")))?;
    let raw: RawPlan =
        serde_json::from_str(json).map_err(|e| HiveError::PlanParse(format!("{}: {}", e, json)))?;

    if !raw.needs_plan || raw.steps.is_empty() {
        return Ok(None);
    }

    if let Some(step) = raw
        .steps
        .iter()
        .find(|s| s.action == StepAction::Tool && s.tool.as_deref().map(str::is_empty).unwrap_or(true))
    {
        return Err(HiveError::PlanParse(format!(
            "tool step without tool name: {}",
            step.description
        )));
    }

    let mut steps = raw.steps;
    if steps.len() > max_steps.max(1) {
        tracing::warn!(
            proposed = steps.len(),
            max = max_steps,
            "Plan truncated to max_plan_steps"
        );
        steps.truncate(max_steps.max(1));
    }

    let mut plan = Plan::new(steps, PlanOrigin::Auto);
    plan.reason = raw.reason;
    Ok(Some(plan))
}

/// 解析模型对确认回复的分类；只认严格的 confirm / decline
pub fn parse_confirmation_output(output: &str) -> ReplyKind {
    let word = output
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    match word.as_str() {
        "confirm" => ReplyKind::Confirm,
        "decline" => ReplyKind::Decline,
        _ => ReplyKind::Unclear,
    }
}

/// Planner：持有 LLM 与步骤上限
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, max_steps: usize) -> Self {
        Self { llm, max_steps }
    }

    /// 让模型判断是否需要计划；模型错误与解析错误都返回 Err，由调用方降级
    pub async fn plan(
        &self,
        message: &str,
        history: &[Message],
        tools: &ToolRegistry,
    ) -> Result<Option<Plan>, HiveError> {
        let system = format!("{}\n\nAvailable tools:\n{}", PLANNER_PROMPT, tools.to_schema_json());
        let mut messages = vec![Message::system(system)];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(message.to_string()));

        let output = self.llm.complete(&messages).await.map_err(HiveError::LlmError)?;
        parse_plan_output(&output, self.max_steps)
    }

    /// 让模型判断一条含糊的回复是否在确认计划；出错按 Unclear 处理
    pub async fn confirm_reply(&self, question: &str, reply: &str) -> ReplyKind {
        let messages = vec![
            Message::system(CONFIRMATION_PROMPT),
            Message::assistant(question.to_string()),
            Message::user(reply.to_string()),
        ];
        match self.llm.complete(&messages).await {
            Ok(output) => parse_confirmation_output(&output),
            Err(e) => {
                tracing::warn!(error = %e, "Confirmation classification failed, treating reply as unrelated");
                ReplyKind::Unclear
            }
        }
    }
}
