//! 流水线引擎：一轮对话的固定阶段状态机
//!
//! intake → routing → tool execution → knowledge → notifications → formatting，
//! 每个阶段进入 / 退出都发布遥测事件，整轮由 orchestrator 事件包裹。
//! 队列、广播器、监管器、存储、模型与工具都通过 PipelineDeps 注入，没有全局单例。
//!
//! 失败语义：
//! - 工具失败 → 失败的执行记录 + tool_failure 通知，循环继续（除非步骤 require_success）
//! - 规划失败 → 降级为直接回复，错误写入 routing.fallback_error
//! - 直接回复时模型出错 → HiveError::LlmError 传给调用方（ConversationRuntime 负责兜底保存）

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use super::analysis::ContradictionCheck;
use super::executor::{run_plan, LoopOutcome, LoopResult};
use super::intent::{classify_reply, force_search_applies, is_bare_acknowledgement, word_count, ReplyKind};
use super::plan::{Plan, PlanOrigin, PlanStep};
use super::planner::Planner;
use super::stage::{Stage, TurnTelemetry, ORCHESTRATOR_ID, ORCHESTRATOR_NAME};
use super::turn::{
    MemoryUsage, NotificationProducer, NotificationSummary, RouteKind, RoutingMetadata, TurnContext,
    TurnRequest, TurnResponse,
};
use crate::config::AppConfig;
use crate::core::{BackgroundSupervisor, HiveError};
use crate::llm::{LlmClient, Message, Role};
use crate::notification::{
    DeliveryChannel, Notification, NotificationAction, NotificationBus, NotificationPriority,
    NotificationSource, TransportNotification,
};
use crate::queue::{WorkItem, WorkPriority, WorkQueue, WorkStatus};
use crate::storage::{MemoryEntry, Storage, StorageProvider};
use crate::telemetry::{TelemetryBroker, TelemetryEvent};
use crate::tools::{ToolExecution, ToolExecutor, ToolRegistry};

pub const PLAN_CONFIRMATION_KIND: &str = "plan_confirmation";
pub const TOOL_FAILURE_KIND: &str = "tool_failure";

const RESPONDER_PROMPT: &str = "[responder] You are a helpful assistant. Answer the user directly and concisely.";
const SUMMARY_PROMPT: &str = "[summary] Write the reply to the user from the tool results below. \
Mention failed tools briefly and do not invent results.";

/// 规划时带上的最近消息条数
const HISTORY_LIMIT: usize = 20;
/// 超过这个词数的回复不再请模型判断是否在确认
const MODEL_CONFIRM_MAX_WORDS: usize = 8;

/// 引擎依赖
pub struct PipelineDeps {
    pub queue: Arc<WorkQueue>,
    pub broker: Arc<TelemetryBroker>,
    pub supervisor: Arc<BackgroundSupervisor>,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolExecutor>,
    pub storage: Arc<dyn StorageProvider>,
    pub notification_producers: Vec<Arc<dyn NotificationProducer>>,
    pub config: AppConfig,
}

impl PipelineDeps {
    /// 按配置创建队列、广播器、监管器与工具执行器
    pub fn from_config(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            broker: Arc::new(TelemetryBroker::new(&config.telemetry)),
            supervisor: Arc::new(BackgroundSupervisor::new()),
            llm,
            tools: Arc::new(ToolExecutor::new(registry, config.tools.tool_timeout_secs)),
            storage,
            notification_producers: Vec::new(),
            config,
        }
    }

    pub fn with_producer(mut self, producer: Arc<dyn NotificationProducer>) -> Self {
        self.notification_producers.push(producer);
        self
    }
}

/// 路由阶段的结果
struct Routed {
    plan: Option<Plan>,
    routing: RoutingMetadata,
}

pub struct PipelineEngine {
    deps: PipelineDeps,
    planner: Planner,
}

impl PipelineEngine {
    pub fn new(deps: PipelineDeps) -> Self {
        let planner = Planner::new(deps.llm.clone(), deps.config.pipeline.max_plan_steps);
        Self { deps, planner }
    }

    pub fn from_config(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        storage: Arc<dyn StorageProvider>,
    ) -> Self {
        Self::new(PipelineDeps::from_config(config, llm, registry, storage))
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.deps.queue
    }

    pub fn broker(&self) -> &Arc<TelemetryBroker> {
        &self.deps.broker
    }

    pub fn supervisor(&self) -> &Arc<BackgroundSupervisor> {
        &self.deps.supervisor
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.deps.storage
    }

    pub fn config(&self) -> &AppConfig {
        &self.deps.config
    }

    /// 处理一轮对话
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnResponse, HiveError> {
        let conversation_id = request.conversation_id.clone();
        tracing::info!(conversation = %conversation_id, "Turn started");

        let mut telemetry = TurnTelemetry::new(&self.deps.broker, &conversation_id);
        telemetry.emit(TelemetryEvent::started(ORCHESTRATOR_ID, ORCHESTRATOR_NAME));

        match self.run_stages(&request, &mut telemetry).await {
            Ok(mut response) => {
                telemetry.emit(
                    TelemetryEvent::completed(ORCHESTRATOR_ID, ORCHESTRATOR_NAME)
                        .with_field("route", route_value(response.routing.route))
                        .with_field("plan_completed", response.plan_completed),
                );
                response.telemetry = telemetry.into_events();
                tracing::info!(
                    conversation = %conversation_id,
                    route = ?response.routing.route,
                    tools = response.tool_details.len(),
                    "Turn completed"
                );
                Ok(response)
            }
            Err(e) => {
                telemetry.failed(ORCHESTRATOR_ID, ORCHESTRATOR_NAME, &e.to_string());
                tracing::error!(conversation = %conversation_id, error = %e, "Turn failed");
                Err(e)
            }
        }
    }

    /// 作废一个暂停中的计划：对应的 plan_confirmation 工作项标记为失败
    pub async fn discard_pending_plan(&self, conversation_id: &str, plan: &Plan, reason: &str) {
        match self.confirmation_item(conversation_id, &plan.id).await {
            Some(item) => {
                self.deps.queue.fail(conversation_id, item.id(), reason).await;
            }
            None => {
                tracing::debug!(conversation = %conversation_id, plan = %plan.id, "No confirmation item to discard");
            }
        }
        tracing::info!(conversation = %conversation_id, plan = %plan.id, reason, "Plan discarded");
    }

    async fn run_stages(
        &self,
        request: &TurnRequest,
        telemetry: &mut TurnTelemetry<'_>,
    ) -> Result<TurnResponse, HiveError> {
        let conversation_id = request.conversation_id.as_str();
        let cfg = &self.deps.config.pipeline;
        let storage = self.deps.storage.open();

        // intake
        telemetry.started(Stage::Intake);
        let history = self.load_history(storage.as_ref(), request).await;
        telemetry.completed(
            Stage::Intake,
            vec![
                ("chars", Value::from(request.message.chars().count())),
                ("history", Value::from(history.len())),
            ],
        );

        // routing
        telemetry.started(Stage::Routing);
        let Routed { mut plan, routing } = self.route(request, &history).await;
        telemetry.completed(
            Stage::Routing,
            vec![
                ("route", route_value(routing.route)),
                ("steps", Value::from(routing.steps.len())),
                ("force_search", Value::from(routing.force_search)),
            ],
        );

        // tool execution
        telemetry.started(Stage::ToolExecution);
        let LoopResult { outcome, executions } = match plan.as_mut() {
            Some(p) => run_plan(p, &self.deps.tools, telemetry).await,
            None => LoopResult {
                outcome: LoopOutcome::NoPlan,
                executions: Vec::new(),
            },
        };
        let bus = NotificationBus::new();
        if let (LoopOutcome::Paused { question }, Some(p)) = (&outcome, plan.as_ref()) {
            telemetry.waiting(Stage::ToolExecution, question);
            bus.publish(self.request_confirmation(conversation_id, p, question).await);
        }
        for record in executions.iter().filter(|r| !r.success) {
            bus.publish(tool_failure_notice(record));
        }
        telemetry.completed(
            Stage::ToolExecution,
            vec![
                ("outcome", Value::from(outcome_label(&outcome))),
                ("executed", Value::from(executions.len())),
                ("skipped", Value::from(matches!(outcome, LoopOutcome::NoPlan))),
            ],
        );

        // knowledge
        telemetry.started(Stage::KnowledgeRetrieval);
        let skip_knowledge =
            matches!(outcome, LoopOutcome::Paused { .. }) || routing.route == RouteKind::CancelledPlan;
        let memories = if skip_knowledge {
            Vec::new()
        } else {
            match storage
                .search_memories(request.memory_scope(), &request.message, cfg.knowledge_limit)
                .await
            {
                Ok(memories) => memories,
                Err(e) => {
                    tracing::warn!(conversation = %conversation_id, error = %e, "Memory search failed");
                    Vec::new()
                }
            }
        };
        telemetry.completed(
            Stage::KnowledgeRetrieval,
            vec![
                ("retrieved", Value::from(memories.len())),
                ("skipped", Value::from(skip_knowledge)),
            ],
        );

        // notifications
        telemetry.started(Stage::NotificationCollection);
        let context = TurnContext {
            conversation_id: conversation_id.to_string(),
            user_id: request.user_id.clone(),
            message: request.message.clone(),
            tool_details: executions.clone(),
            awaiting_confirmation: matches!(outcome, LoopOutcome::Paused { .. }),
        };
        let notifications = self.collect_notifications(storage.as_ref(), &bus, &context).await;
        telemetry.completed(
            Stage::NotificationCollection,
            vec![
                ("count", Value::from(notifications.count)),
                ("urgent", Value::from(notifications.urgent.len())),
            ],
        );

        // formatting
        telemetry.started(Stage::ResponseFormatting);
        let response = match self
            .format_response(request, &history, &routing, &outcome, &executions, &memories)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                let stage = Stage::ResponseFormatting;
                telemetry.failed(stage.agent_id(), stage.agent_name(), &e.to_string());
                return Err(e);
            }
        };
        telemetry.completed(
            Stage::ResponseFormatting,
            vec![("chars", Value::from(response.chars().count()))],
        );

        let plan_completed = plan.as_ref().map(|p| p.completed).unwrap_or(false);
        if routing.route == RouteKind::ResumedPlan
            && plan_completed
            && self.deps.config.queue.purge_completed_on_resume
        {
            let purged = self.deps.queue.clear_completed(conversation_id).await;
            tracing::debug!(conversation = %conversation_id, purged, "Completed work items purged");
        }

        if cfg.contradiction_check
            && routing.route != RouteKind::CancelledPlan
            && !request.message.trim().is_empty()
            && !is_bare_acknowledgement(&request.message, cfg.acknowledgement_max_words)
        {
            self.schedule_contradiction_check(request);
        }

        let mut tools_used: Vec<String> = Vec::new();
        for record in &executions {
            if !tools_used.contains(&record.tool) {
                tools_used.push(record.tool.clone());
            }
        }

        Ok(TurnResponse {
            conversation_id: conversation_id.to_string(),
            response,
            memory: MemoryUsage {
                retrieved: memories.len(),
                entries: memories,
            },
            tools_used,
            tool_details: executions,
            notifications,
            telemetry: Vec::new(),
            awaiting_confirmation: matches!(outcome, LoopOutcome::Paused { .. }),
            plan: plan.filter(|p| !p.dirty),
            plan_completed,
            routing,
        })
    }

    async fn load_history(&self, storage: &dyn Storage, request: &TurnRequest) -> Vec<Message> {
        let mut history = match storage
            .recent_messages(&request.conversation_id, HISTORY_LIMIT)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(conversation = %request.conversation_id, error = %e, "Failed to load history");
                Vec::new()
            }
        };
        // 调用方可能已经先写入了本轮的用户消息
        if history
            .last()
            .map(|m| m.role == Role::User && m.content == request.message)
            .unwrap_or(false)
        {
            history.pop();
        }
        history
    }

    async fn route(&self, request: &TurnRequest, history: &[Message]) -> Routed {
        let cfg = &self.deps.config.pipeline;
        let conversation_id = request.conversation_id.as_str();
        let mut routing = RoutingMetadata::direct();
        let mut plan = None;
        let mut awaiting = false;
        let mut decided = false;

        if let Some(mut pending) = request.pending_plan.clone().filter(Plan::is_pending) {
            if pending.is_waiting_user() {
                awaiting = true;
                let question = pending
                    .current()
                    .map(|s| s.description.clone())
                    .unwrap_or_default();
                match self.classify_confirmation(&question, &request.message).await {
                    ReplyKind::Confirm => {
                        tracing::info!(conversation = %conversation_id, plan = %pending.id, "Resuming plan after confirmation");
                        if let Some(item) = self.confirmation_item(conversation_id, &pending.id).await {
                            let mut result = serde_json::Map::new();
                            result.insert("resolution".into(), Value::from("confirmed"));
                            self.deps.queue.complete(conversation_id, item.id(), result).await;
                        }
                        pending.advance();
                        routing.route = RouteKind::ResumedPlan;
                        routing.reason = pending.reason.clone();
                        plan = Some(pending);
                        decided = true;
                    }
                    ReplyKind::Decline => {
                        pending.mark_dirty();
                        self.discard_pending_plan(conversation_id, &pending, "declined").await;
                        routing.route = RouteKind::CancelledPlan;
                        routing.discarded_plan = Some(pending.id);
                        decided = true;
                    }
                    ReplyKind::Unclear => {
                        pending.mark_dirty();
                        self.discard_pending_plan(conversation_id, &pending, "superseded").await;
                        routing.discarded_plan = Some(pending.id);
                    }
                }
            } else {
                pending.mark_dirty();
                self.discard_pending_plan(conversation_id, &pending, "not awaiting confirmation").await;
                routing.discarded_plan = Some(pending.id);
            }
        }

        if !decided {
            match self
                .planner
                .plan(&request.message, history, self.deps.tools.registry())
                .await
            {
                Ok(Some(new_plan)) => {
                    tracing::info!(
                        conversation = %conversation_id,
                        plan = %new_plan.id,
                        steps = new_plan.steps.len(),
                        "New plan created"
                    );
                    routing.route = RouteKind::NewPlan;
                    routing.reason = new_plan.reason.clone();
                    plan = Some(new_plan);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(conversation = %conversation_id, error = %e, "Planning failed, falling back to direct reply");
                    routing.fallback_error = Some(e.to_string());
                }
            }
        }

        routing.force_search = routing.route != RouteKind::CancelledPlan
            && force_search_applies(
                request.force_web_search,
                &request.message,
                awaiting,
                cfg.acknowledgement_max_words,
            );
        if routing.force_search {
            let search = PlanStep::tool(
                "Search the web",
                cfg.search_tool.clone(),
                json!({ "query": request.message }),
            );
            match plan.as_mut() {
                Some(p) if p.has_pending_tool_step(&cfg.search_tool) => {}
                Some(p) => p.insert_next(search),
                None => {
                    plan = Some(
                        Plan::new(
                            vec![search, PlanStep::respond("Answer from the search results")],
                            PlanOrigin::ForcedSearch,
                        )
                        .with_reason("web search requested"),
                    );
                    routing.route = RouteKind::NewPlan;
                    routing.reason = Some("web search requested".to_string());
                }
            }
        } else if request.force_web_search {
            tracing::debug!(conversation = %conversation_id, "Force search ignored for bare acknowledgement");
        }

        if let Some(p) = &plan {
            routing.steps = p.step_descriptions();
        }

        Routed { plan, routing }
    }

    /// 关键词优先；判断不了的短回复再问模型
    async fn classify_confirmation(&self, question: &str, message: &str) -> ReplyKind {
        let kind = classify_reply(message);
        if kind != ReplyKind::Unclear
            || !self.deps.config.pipeline.confirm_with_model
            || word_count(message) > MODEL_CONFIRM_MAX_WORDS
        {
            return kind;
        }
        self.planner.confirm_reply(question, message).await
    }

    async fn confirmation_item(&self, conversation_id: &str, plan_id: &str) -> Option<WorkItem> {
        self.deps
            .queue
            .find_by_type(conversation_id, PLAN_CONFIRMATION_KIND)
            .await
            .into_iter()
            .find(|item| {
                item.status == WorkStatus::WaitingUser
                    && item.payload.get("plan_id").and_then(Value::as_str) == Some(plan_id)
            })
    }

    /// 计划暂停：入队 WAITING_USER 工作项，返回阻塞式确认通知
    async fn request_confirmation(&self, conversation_id: &str, plan: &Plan, question: &str) -> Notification {
        if self.confirmation_item(conversation_id, &plan.id).await.is_none() {
            let item = WorkItem::new(conversation_id, PLAN_CONFIRMATION_KIND, Stage::ToolExecution.agent_id())
                .with_priority(WorkPriority::High)
                .with_status(WorkStatus::WaitingUser)
                .with_field("plan_id", plan.id.clone())
                .with_field("step", plan.current_step)
                .with_field("question", question);
            self.deps.queue.enqueue(conversation_id, item).await;
        }

        Notification::new(PLAN_CONFIRMATION_KIND, question)
            .with_priority(NotificationPriority::High)
            .with_channel(DeliveryChannel::Blocking)
            .with_title("Confirmation needed")
            .with_source(
                NotificationSource::agent(Stage::ToolExecution.agent_id())
                    .with_feature("plan")
                    .with_reference(plan.id.clone()),
            )
            .with_data("plan_id", plan.id.clone())
            .with_action(NotificationAction::new("confirm", "Yes").with_param("plan_id", plan.id.clone()))
            .with_action(NotificationAction::new("decline", "No").with_param("plan_id", plan.id.clone()))
    }

    async fn collect_notifications(
        &self,
        storage: &dyn Storage,
        bus: &NotificationBus,
        context: &TurnContext,
    ) -> NotificationSummary {
        match storage.take_notices(&context.conversation_id).await {
            Ok(notices) => {
                bus.publish_many(notices);
            }
            Err(e) => {
                tracing::warn!(conversation = %context.conversation_id, error = %e, "Failed to load deferred notices");
            }
        }
        for producer in &self.deps.notification_producers {
            let produced = producer.collect(context).await;
            tracing::debug!(producer = producer.name(), count = produced.len(), "Notifications collected");
            bus.publish_many(produced);
        }

        let active = bus.active(Utc::now());
        NotificationSummary {
            count: active.len(),
            urgent: active
                .iter()
                .filter(|n| n.priority.is_urgent())
                .map(TransportNotification::from)
                .collect(),
            all: active.iter().map(TransportNotification::from).collect(),
        }
    }

    async fn format_response(
        &self,
        request: &TurnRequest,
        history: &[Message],
        routing: &RoutingMetadata,
        outcome: &LoopOutcome,
        executions: &[ToolExecution],
        memories: &[MemoryEntry],
    ) -> Result<String, HiveError> {
        if routing.route == RouteKind::CancelledPlan {
            return Ok("Okay, I won't go ahead with that plan.".to_string());
        }
        match outcome {
            LoopOutcome::Paused { question } => Ok(question.clone()),
            LoopOutcome::Aborted { step, error } => Ok(format!(
                "I couldn't finish the plan: step {} failed ({}).",
                step + 1,
                error
            )),
            LoopOutcome::Respond if !executions.is_empty() => {
                Ok(self.summarize(request, history, executions).await)
            }
            LoopOutcome::Respond | LoopOutcome::NoPlan => self.direct_reply(request, history, memories).await,
        }
    }

    /// 模型汇总工具结果；模型失败时用确定性的文本汇总
    async fn summarize(&self, request: &TurnRequest, history: &[Message], executions: &[ToolExecution]) -> String {
        let results = serde_json::to_string_pretty(executions).unwrap_or_default();
        let mut messages = vec![Message::system(format!("{}\n\nTool results:\n{}", SUMMARY_PROMPT, results))];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(request.message.clone()));

        match self.deps.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => fallback_summary(executions),
            Err(e) => {
                tracing::warn!(conversation = %request.conversation_id, error = %e, "Summary failed, using fallback");
                fallback_summary(executions)
            }
        }
    }

    async fn direct_reply(
        &self,
        request: &TurnRequest,
        history: &[Message],
        memories: &[MemoryEntry],
    ) -> Result<String, HiveError> {
        let mut system = RESPONDER_PROMPT.to_string();
        if !memories.is_empty() {
            system.push_str("\n\nWhat you remember about the user:\n");
            for memory in memories {
                system.push_str(&format!("- {}\n", memory.text));
            }
        }
        let mut messages = vec![Message::system(system)];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(request.message.clone()));

        self.deps.llm.complete(&messages).await.map_err(HiveError::LlmError)
    }

    fn schedule_contradiction_check(&self, request: &TurnRequest) {
        let check = ContradictionCheck::new(
            request.conversation_id.clone(),
            request.memory_scope(),
            request.message.clone(),
            self.deps.llm.clone(),
            self.deps.storage.clone(),
            self.deps.broker.clone(),
            self.deps.queue.clone(),
        )
        .with_memory_limit(self.deps.config.pipeline.knowledge_limit);
        self.deps.supervisor.schedule("contradiction_check", check.run());
    }
}

fn route_value(route: RouteKind) -> Value {
    serde_json::to_value(route).unwrap_or(Value::Null)
}

fn outcome_label(outcome: &LoopOutcome) -> &'static str {
    match outcome {
        LoopOutcome::NoPlan => "no_plan",
        LoopOutcome::Paused { .. } => "paused",
        LoopOutcome::Respond => "respond",
        LoopOutcome::Aborted { .. } => "aborted",
    }
}

fn tool_failure_notice(record: &ToolExecution) -> Notification {
    let error = record.error.clone().unwrap_or_default();
    Notification::new(TOOL_FAILURE_KIND, format!("{} failed: {}", record.tool, error))
        .with_priority(NotificationPriority::Medium)
        .with_source(NotificationSource::agent(format!("tool.{}", record.tool)).with_feature("tools"))
        .with_data("tool", record.tool.clone())
        .with_data("error", error)
}

/// 不依赖模型的工具结果汇总
pub(crate) fn fallback_summary(executions: &[ToolExecution]) -> String {
    let mut lines = vec!["Here is what I found:".to_string()];
    for record in executions {
        match (&record.result, &record.error) {
            (Some(result), _) if record.success => lines.push(format!("- {}: {}", record.tool, result)),
            (_, Some(error)) => lines.push(format!("- {} failed: {}", record.tool, error)),
            _ => lines.push(format!("- {}: no result", record.tool)),
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use crate::storage::InMemoryStorageProvider;
    use crate::telemetry::AgentStatus;
    use crate::tools::EchoTool;

    fn engine_with(llm: Arc<dyn LlmClient>) -> PipelineEngine {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let mut config = AppConfig::default();
        config.pipeline.contradiction_check = false;
        PipelineEngine::from_config(config, llm, registry, Arc::new(InMemoryStorageProvider::new()))
    }

    #[tokio::test]
    async fn test_direct_turn_announces_every_stage() {
        let engine = engine_with(Arc::new(MockLlmClient));
        let response = engine.handle_turn(TurnRequest::new("c1", "hello")).await.unwrap();

        assert_eq!(response.response, "Echo from Mock: hello");
        assert_eq!(response.routing.route, RouteKind::Direct);
        assert!(response.plan.is_none());

        for stage in Stage::ALL {
            for status in [AgentStatus::Started, AgentStatus::Completed] {
                assert!(
                    response
                        .telemetry
                        .iter()
                        .any(|e| e.agent_id == stage.agent_id() && e.status == status),
                    "{} {:?}",
                    stage.agent_id(),
                    status
                );
            }
        }
        assert_eq!(response.telemetry.first().unwrap().agent_id, ORCHESTRATOR_ID);
        assert_eq!(response.telemetry.last().unwrap().agent_id, ORCHESTRATOR_ID);
        assert_eq!(engine.broker().snapshot("c1"), response.telemetry);
    }

    #[tokio::test]
    async fn test_planning_failure_falls_back_to_direct() {
        let llm = ScriptedLlmClient::new()
            .on("[planner]", "I would rather not say")
            .on("[responder]", "direct answer");
        let engine = engine_with(Arc::new(llm));
        let response = engine.handle_turn(TurnRequest::new("c1", "hi")).await.unwrap();

        assert_eq!(response.response, "direct answer");
        assert_eq!(response.routing.route, RouteKind::Direct);
        assert!(response.routing.fallback_error.is_some());
    }

    #[tokio::test]
    async fn test_direct_reply_failure_propagates() {
        let llm = ScriptedLlmClient::new()
            .on("[planner]", r#"{"needs_plan": false}"#)
            .fail_on("[responder]", "model offline");
        let engine = engine_with(Arc::new(llm));
        let err = engine.handle_turn(TurnRequest::new("c1", "hi")).await.unwrap_err();
        assert!(matches!(err, HiveError::LlmError(_)));

        let last = engine.broker().snapshot("c1").pop().unwrap();
        assert_eq!(last.agent_id, ORCHESTRATOR_ID);
        assert_eq!(last.status, AgentStatus::Error);
    }

    #[tokio::test]
    async fn test_summary_falls_back_when_model_fails() {
        let llm = ScriptedLlmClient::new()
            .on(
                "[planner]",
                r#"{"needs_plan": true, "steps": [
                    {"action": "tool", "tool": "echo", "inputs": {"text": "ping"}},
                    {"action": "respond"}
                ]}"#,
            )
            .fail_on("[summary]", "timeout");
        let engine = engine_with(Arc::new(llm));
        let response = engine.handle_turn(TurnRequest::new("c1", "echo ping")).await.unwrap();

        assert_eq!(response.routing.route, RouteKind::NewPlan);
        assert!(response.plan_completed);
        assert_eq!(response.tools_used, vec!["echo"]);
        assert!(response.response.starts_with("Here is what I found:"));
        assert!(response.response.contains("ping"));
    }

    #[tokio::test]
    async fn test_failed_tool_produces_notification() {
        let llm = ScriptedLlmClient::new().on(
            "[planner]",
            r#"{"needs_plan": true, "steps": [{"action": "tool", "tool": "missing", "inputs": {}}]}"#,
        );
        let engine = engine_with(Arc::new(llm));
        let response = engine.handle_turn(TurnRequest::new("c1", "do it")).await.unwrap();

        assert_eq!(response.tool_details.len(), 1);
        assert!(!response.tool_details[0].success);
        assert_eq!(response.notifications.count, 1);
        assert_eq!(response.notifications.all[0].kind, TOOL_FAILURE_KIND);
        assert!(response.notifications.urgent.is_empty());
    }

    #[test]
    fn test_fallback_summary_lists_each_tool() {
        let ok = ToolExecution {
            tool: "echo".into(),
            inputs: json!({}),
            result: Some(json!({"text": "hi"})),
            error: None,
            success: true,
            duration_ms: 1,
        };
        let failed = ToolExecution {
            tool: "web_search".into(),
            inputs: json!({}),
            result: None,
            error: Some("Tool timeout: web_search".into()),
            success: false,
            duration_ms: 30_000,
        };
        let text = fallback_summary(&[ok, failed]);
        assert!(text.contains("- echo: {\"text\":\"hi\"}"));
        assert!(text.contains("- web_search failed: Tool timeout: web_search"));
    }
}
