//! 后台矛盾检测：回复之后，把用户的新说法与长期记忆比对
//!
//! 作为 BackgroundSupervisor 的任务运行：自己 open 存储句柄，发布 started / completed / error 遥测，
//! 发现矛盾时存入延迟通知（下一轮通知收集阶段取出）并入队一个 contradiction 工作项。

use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_json::Value;

use super::planner::extract_json;
use crate::llm::{LlmClient, Message};
use crate::notification::{
    DeliveryChannel, Notification, NotificationAction, NotificationPriority, NotificationSource,
};
use crate::queue::{WorkItem, WorkPriority, WorkQueue};
use crate::storage::{MemoryEntry, StorageProvider};
use crate::telemetry::{TelemetryBroker, TelemetryEvent};

pub const CONTRADICTION_AGENT_ID: &str = "contradiction_checker";
pub const CONTRADICTION_AGENT_NAME: &str = "Contradiction Checker";
pub const CONTRADICTION_KIND: &str = "contradiction";

pub const CONTRADICTION_PROMPT: &str = "[contradiction] Compare the user's new statement with the stored memories. \
Reply with JSON only: {\"contradiction\": bool, \"memory_id\": string, \"explanation\": string}. \
Only report a contradiction when the statement clearly conflicts with a memory.";

const DEFAULT_MEMORY_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    contradiction: bool,
    #[serde(default)]
    memory_id: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

/// 一次矛盾检测任务，持有所需的全部句柄，可直接交给监管器
pub struct ContradictionCheck {
    conversation_id: String,
    scope: String,
    statement: String,
    llm: Arc<dyn LlmClient>,
    storage: Arc<dyn StorageProvider>,
    broker: Arc<TelemetryBroker>,
    queue: Arc<WorkQueue>,
    memory_limit: usize,
}

impl ContradictionCheck {
    pub fn new(
        conversation_id: impl Into<String>,
        scope: impl Into<String>,
        statement: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        storage: Arc<dyn StorageProvider>,
        broker: Arc<TelemetryBroker>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            scope: scope.into(),
            statement: statement.into(),
            llm,
            storage,
            broker,
            queue,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit.max(1);
        self
    }

    /// 执行检测；错误已发布为 error 遥测，返回给监管器记录日志
    pub async fn run(self) -> anyhow::Result<()> {
        self.broker.publish(
            &self.conversation_id,
            TelemetryEvent::started(CONTRADICTION_AGENT_ID, CONTRADICTION_AGENT_NAME),
        );

        match self.check().await {
            Ok(found) => {
                self.broker.publish(
                    &self.conversation_id,
                    TelemetryEvent::completed(CONTRADICTION_AGENT_ID, CONTRADICTION_AGENT_NAME)
                        .with_field("contradiction", found),
                );
                Ok(())
            }
            Err(e) => {
                self.broker.publish(
                    &self.conversation_id,
                    TelemetryEvent::error(CONTRADICTION_AGENT_ID, CONTRADICTION_AGENT_NAME, format!("{:#}", e)),
                );
                Err(e)
            }
        }
    }

    async fn check(&self) -> anyhow::Result<bool> {
        let storage = self.storage.open();
        let memories = storage
            .search_memories(&self.scope, &self.statement, self.memory_limit)
            .await
            .map_err(|e| anyhow!("memory search failed: {}", e))?;
        if memories.is_empty() {
            return Ok(false);
        }

        let listing = memories
            .iter()
            .map(|m| format!("- [{}] {}", m.id, m.text))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            Message::system(format!("{}\n\nStored memories:\n{}", CONTRADICTION_PROMPT, listing)),
            Message::user(self.statement.clone()),
        ];
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| anyhow!("contradiction model call failed: {}", e))?;
        let json = extract_json(&output).ok_or_else(|| anyhow!("no JSON verdict in model output: {}", output))?;
        let verdict: Verdict = serde_json::from_str(json).context("invalid contradiction verdict")?;
        if !verdict.contradiction {
            return Ok(false);
        }

        let memory = verdict
            .memory_id
            .as_deref()
            .and_then(|id| memories.iter().find(|m| m.id == id))
            .unwrap_or(&memories[0]);
        let notice = self.notice(memory, verdict.explanation.as_deref());
        let notice_id = notice.id.clone();

        storage
            .push_notice(&self.conversation_id, notice)
            .await
            .map_err(|e| anyhow!("failed to store contradiction notice: {}", e))?;

        let item = WorkItem::new(&self.conversation_id, CONTRADICTION_KIND, CONTRADICTION_AGENT_ID)
            .with_priority(WorkPriority::High)
            .with_field("memory_id", memory.id.clone())
            .with_field("statement", self.statement.clone())
            .with_field("notice_id", notice_id);
        self.queue.enqueue(&self.conversation_id, item).await;

        tracing::info!(
            conversation = %self.conversation_id,
            memory = %memory.id,
            "Contradiction with long-term memory detected"
        );
        Ok(true)
    }

    fn notice(&self, memory: &MemoryEntry, explanation: Option<&str>) -> Notification {
        let message = format!(
            "You said \"{}\", but earlier I noted: \"{}\".",
            self.statement, memory.text
        );
        let mut notice = Notification::new(CONTRADICTION_KIND, message)
            .with_priority(NotificationPriority::High)
            .with_channel(DeliveryChannel::Async)
            .with_title("Possible contradiction")
            .with_source(
                NotificationSource::agent(CONTRADICTION_AGENT_ID)
                    .with_feature("contradiction_check")
                    .with_reference(memory.id.clone()),
            )
            .with_data("memory_id", memory.id.clone())
            .with_data("memory_text", memory.text.clone())
            .with_data("statement", self.statement.clone())
            .with_action(NotificationAction::new("keep_new", "Update memory").with_param("memory_id", memory.id.clone()))
            .with_action(NotificationAction::new("keep_memory", "Keep what you knew").with_param("memory_id", memory.id.clone()));
        if let Some(explanation) = explanation {
            notice = notice
                .with_summary(explanation.to_string())
                .with_data("explanation", Value::from(explanation));
        }
        notice
    }
}
