//! 流水线集成测试：多轮计划、遥测广播、后台矛盾检测、强制搜索策略

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use hive::config::AppConfig;
    use hive::core::{ShutdownCoordinator, SupervisorDrain};
    use hive::llm::{LlmClient, ScriptedLlmClient};
    use hive::notification::NotificationPriority;
    use hive::pipeline::{
        ConversationRuntime, PipelineEngine, PlanOrigin, RouteKind, Stage, TurnRequest,
        CONTRADICTION_AGENT_ID, CONTRADICTION_KIND, ORCHESTRATOR_ID, PLAN_CONFIRMATION_KIND,
    };
    use hive::queue::{WorkItem, WorkPriority, WorkStatus};
    use hive::storage::{InMemoryStorageProvider, MemoryEntry, Storage};
    use hive::telemetry::{AgentStatus, TelemetryEvent};
    use hive::tools::{EchoTool, Tool, ToolRegistry};

    const FLIGHT_PLAN: &str = r#"{"needs_plan": true, "reason": "flight prices change daily", "steps": [
        {"description": "Should I search the web for flights to Tokyo?", "action": "wait_user"},
        {"description": "search flights", "action": "tool", "tool": "web_search", "inputs": {"query": "flights to Tokyo"}},
        {"description": "answer", "action": "respond"}
    ]}"#;

    struct CountingSearch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for CountingSearch {
        fn name(&self) -> &str {
            "web_search"
        }

        fn description(&self) -> &str {
            "search the web"
        }

        async fn execute(&self, args: Value) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "query": args["query"], "results": ["JAL 123", "ANA 456"] }))
        }
    }

    struct Harness {
        runtime: ConversationRuntime,
        storage: Arc<InMemoryStorageProvider>,
        search: Arc<CountingSearch>,
    }

    impl Harness {
        fn engine(&self) -> &Arc<PipelineEngine> {
            self.runtime.engine()
        }
    }

    fn scripted() -> ScriptedLlmClient {
        ScriptedLlmClient::new()
            .on("[summary]", "Found 2 flights to Tokyo.")
            .on("find flights", FLIGHT_PLAN)
            .on("[planner]", r#"{"needs_plan": false}"#)
    }

    fn harness_with(llm: ScriptedLlmClient, contradiction_check: bool) -> Harness {
        hive::observability::init();

        let storage = Arc::new(InMemoryStorageProvider::new());
        let search = Arc::new(CountingSearch {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register_arc(search.clone());

        let mut config = AppConfig::default();
        config.pipeline.contradiction_check = contradiction_check;
        let llm: Arc<dyn LlmClient> = Arc::new(llm);
        let engine = PipelineEngine::from_config(config, llm, registry, storage.clone());

        Harness {
            runtime: ConversationRuntime::new(Arc::new(engine)),
            storage,
            search,
        }
    }

    fn harness() -> Harness {
        harness_with(scripted(), false)
    }

    #[tokio::test]
    async fn test_confirmed_plan_resumes_and_completes() {
        for reply in ["yes", "sì"] {
            let h = harness();

            let first = h
                .runtime
                .handle_message("c1", Some("u1"), "find flights to Tokyo", false)
                .await
                .unwrap();
            assert!(first.awaiting_confirmation);
            assert_eq!(first.routing.route, RouteKind::NewPlan);
            assert_eq!(first.routing.reason.as_deref(), Some("flight prices change daily"));
            assert_eq!(first.routing.steps.len(), 3);
            assert!(first.tool_details.is_empty());
            assert_eq!(first.notifications.urgent.len(), 1);
            assert_eq!(first.notifications.urgent[0].kind, PLAN_CONFIRMATION_KIND);

            let waiting = h.engine().queue().find_by_status("c1", WorkStatus::WaitingUser).await;
            assert_eq!(waiting.len(), 1);
            assert_eq!(waiting[0].priority, WorkPriority::High);

            let second = h.runtime.handle_message("c1", Some("u1"), reply, false).await.unwrap();
            assert_eq!(second.routing.route, RouteKind::ResumedPlan, "{reply}");
            assert!(second.plan_completed);
            assert!(second.plan.as_ref().unwrap().completed);
            assert_eq!(second.tools_used, vec!["web_search"]);
            assert!(second.tool_details[0].success);
            assert_eq!(second.response, "Found 2 flights to Tokyo.");
            assert!(!second.awaiting_confirmation);

            // 确认项完成后随恢复一起清理
            assert_eq!(h.engine().queue().len("c1").await, 0);
            assert!(h.storage.handle().load_plan("c1").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_unrelated_message_discards_plan() {
        let h = harness();
        let first = h
            .runtime
            .handle_message("c1", None, "find flights to Tokyo", false)
            .await
            .unwrap();
        let plan_id = first.plan.unwrap().id;

        let second = h
            .runtime
            .handle_message("c1", None, "what's the weather in Paris?", false)
            .await
            .unwrap();
        assert!(second.plan.is_none());
        assert!(!second.plan_completed);
        assert_eq!(second.routing.route, RouteKind::Direct);
        assert_eq!(second.routing.discarded_plan.as_deref(), Some(plan_id.as_str()));
        assert!(second.tool_details.is_empty());
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);

        let failed = h.engine().queue().find_by_status("c1", WorkStatus::Failed).await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["error"], "superseded");
        assert!(h.storage.handle().load_plan("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decline_cancels_plan() {
        let h = harness();
        h.runtime
            .handle_message("c1", None, "find flights to Tokyo", false)
            .await
            .unwrap();

        let second = h.runtime.handle_message("c1", None, "no thanks", false).await.unwrap();
        assert_eq!(second.routing.route, RouteKind::CancelledPlan);
        assert!(second.plan.is_none());
        assert_eq!(second.response, "Okay, I won't go ahead with that plan.");
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_plan_turn_announces_every_stage() {
        let h = harness();
        let subscription = h.engine().broker().register("c1");

        let response = h.runtime.handle_message("c1", None, "hello there", false).await.unwrap();
        assert_eq!(response.routing.route, RouteKind::Direct);

        let events = subscription.drain();
        assert_eq!(events, response.telemetry);
        for stage in Stage::ALL {
            let statuses: Vec<_> = events
                .iter()
                .filter(|e| e.agent_id == stage.agent_id())
                .map(|e| e.status)
                .collect();
            assert_eq!(statuses, vec![AgentStatus::Started, AgentStatus::Completed], "{:?}", stage);
        }
        let tool_stage = events
            .iter()
            .find(|e| e.agent_id == "tool_executor" && e.status == AgentStatus::Completed)
            .unwrap();
        assert_eq!(tool_stage.extra["skipped"], true);
        assert_eq!(tool_stage.extra["executed"], 0);
    }

    #[tokio::test]
    async fn test_two_subscribers_receive_same_event() {
        let h = harness();
        let broker = h.engine().broker();
        let a = broker.register("c1");
        let b = broker.register("c1");

        let event = TelemetryEvent::started(ORCHESTRATOR_ID, "Orchestrator");
        assert_eq!(broker.publish("c1", event.clone()), 2);
        assert_eq!(a.drain(), vec![event.clone()]);
        assert_eq!(b.drain(), vec![event]);

        h.runtime.handle_message("c1", None, "hi", false).await.unwrap();
        let first_a = a.try_recv().unwrap();
        let first_b = b.try_recv().unwrap();
        assert_eq!(first_a, first_b);
        assert_eq!(first_a.agent_id, ORCHESTRATOR_ID);
        assert_eq!(first_a.status, AgentStatus::Started);
    }

    #[tokio::test]
    async fn test_contradiction_surfaces_on_next_turn() {
        let llm = scripted().on(
            "[contradiction]",
            r#"{"contradiction": true, "explanation": "you said you are vegetarian"}"#,
        );
        let h = harness_with(llm, true);
        h.storage
            .handle()
            .add_memory("u1", MemoryEntry::new("I am vegetarian and never eat meat"))
            .await
            .unwrap();

        let first = h
            .runtime
            .handle_message("c1", Some("u1"), "I love eating meat burgers", false)
            .await
            .unwrap();
        assert_eq!(first.memory.retrieved, 1);
        assert!(h.engine().supervisor().drain(Duration::from_secs(2)).await);

        h.engine()
            .queue()
            .enqueue("c1", WorkItem::new("c1", "followup", "test").with_priority(WorkPriority::Low))
            .await;
        let next = h.engine().queue().start_next("c1").await.unwrap();
        assert_eq!(next.kind(), CONTRADICTION_KIND);

        let checker: Vec<_> = h
            .engine()
            .broker()
            .snapshot("c1")
            .into_iter()
            .filter(|e| e.agent_id == CONTRADICTION_AGENT_ID)
            .map(|e| e.status)
            .collect();
        assert_eq!(checker, vec![AgentStatus::Started, AgentStatus::Completed]);

        let second = h
            .runtime
            .handle_message("c1", Some("u1"), "what should I cook tonight?", false)
            .await
            .unwrap();
        assert_eq!(second.notifications.urgent.len(), 1);
        let notice = &second.notifications.urgent[0];
        assert_eq!(notice.kind, CONTRADICTION_KIND);
        assert_eq!(notice.priority, NotificationPriority::High);
        assert_eq!(notice.data["summary"], "you said you are vegetarian");
    }

    #[tokio::test]
    async fn test_bare_acknowledgement_does_not_force_second_search() {
        let h = harness();

        let first = h
            .runtime
            .handle_message("c1", None, "find flights to Tokyo", true)
            .await
            .unwrap();
        assert!(first.routing.force_search);
        assert!(first.awaiting_confirmation);
        assert_eq!(first.routing.steps.len(), 3);

        let second = h.runtime.handle_message("c1", None, "yes", true).await.unwrap();
        assert!(!second.routing.force_search);
        assert!(second.plan_completed);
        assert_eq!(second.tool_details.len(), 1);
        assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_search_without_plan() {
        let h = harness();
        let response = h
            .runtime
            .handle_message("c1", None, "latest rust release", true)
            .await
            .unwrap();

        assert_eq!(response.routing.route, RouteKind::NewPlan);
        assert!(response.routing.force_search);
        assert_eq!(response.plan.as_ref().unwrap().origin, PlanOrigin::ForcedSearch);
        assert_eq!(response.tools_used, vec!["web_search"]);
        assert_eq!(response.tool_details[0].inputs["query"], "latest rust release");
        assert!(response.plan_completed);
    }

    #[tokio::test]
    async fn test_engine_accepts_plan_from_caller() {
        let h = harness();
        let plan = hive::pipeline::Plan::new(
            vec![
                hive::pipeline::PlanStep::wait_user("Echo it?"),
                hive::pipeline::PlanStep::tool("echo", "echo", json!({"text": "manual"})),
            ],
            PlanOrigin::Manual,
        );
        let request = TurnRequest::new("c9", "ok").with_pending_plan(Some(plan));

        let response = h.engine().handle_turn(request).await.unwrap();
        assert_eq!(response.routing.route, RouteKind::ResumedPlan);
        assert_eq!(response.tool_details[0].result, Some(json!({"text": "manual"})));
        assert!(response.plan_completed);
    }

    #[tokio::test]
    async fn test_shutdown_drains_background_checks() {
        let h = harness_with(scripted(), true);
        h.runtime
            .handle_message("c1", Some("u1"), "tell me about Kyoto temples", false)
            .await
            .unwrap();

        let mut coordinator = ShutdownCoordinator::new().with_timeout(2);
        coordinator.register(SupervisorDrain::from_config(
            h.engine().supervisor().clone(),
            &h.engine().config().supervisor,
        ));
        assert_eq!(coordinator.run_cleanup().await, 1);
        assert_eq!(h.engine().supervisor().active_count(), 0);
    }
}
