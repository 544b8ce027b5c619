//! 对话流水线：计划状态机、阶段遥测、路由启发式、引擎与会话运行时

pub mod analysis;
pub mod engine;
pub mod executor;
pub mod intent;
pub mod plan;
pub mod planner;
pub mod runtime;
pub mod stage;
pub mod turn;

pub use analysis::{ContradictionCheck, CONTRADICTION_AGENT_ID, CONTRADICTION_KIND};
pub use engine::{PipelineDeps, PipelineEngine, PLAN_CONFIRMATION_KIND, TOOL_FAILURE_KIND};
pub use executor::{LoopOutcome, LoopResult};
pub use intent::{classify_reply, force_search_applies, is_bare_acknowledgement, ReplyKind};
pub use plan::{Plan, PlanOrigin, PlanStep, StepAction};
pub use planner::{parse_plan_output, Planner};
pub use runtime::{ConversationRuntime, FALLBACK_ERROR_REPLY};
pub use stage::{Stage, ORCHESTRATOR_ID, ORCHESTRATOR_NAME};
pub use turn::{
    MemoryUsage, NotificationProducer, NotificationSummary, RouteKind, RoutingMetadata, TurnContext,
    TurnRequest, TurnResponse,
};
