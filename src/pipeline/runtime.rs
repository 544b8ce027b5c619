//! 会话运行时：在引擎外面负责计划与消息的持久化
//!
//! 读取待续计划 → 写入用户消息 → 执行引擎 → 保存或清除计划 → 写入助手回复。
//! 引擎出错时先写入一条兜底的助手消息，再把错误交给调用方。

use std::sync::Arc;

use super::engine::PipelineEngine;
use super::turn::{TurnRequest, TurnResponse};
use crate::core::HiveError;
use crate::llm::Message;
use crate::storage::Storage;

/// 引擎出错时写入会话的兜底回复
pub const FALLBACK_ERROR_REPLY: &str = "Sorry, something went wrong while handling your message. Please try again.";

pub struct ConversationRuntime {
    engine: Arc<PipelineEngine>,
}

impl ConversationRuntime {
    pub fn new(engine: Arc<PipelineEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<PipelineEngine> {
        &self.engine
    }

    /// 处理一条用户消息；计划跨轮保存在存储里
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        message: &str,
        force_web_search: bool,
    ) -> Result<TurnResponse, HiveError> {
        let storage = self.engine.storage().open();
        let pending_plan = storage
            .load_plan(conversation_id)
            .await
            .map_err(HiveError::Storage)?;
        storage
            .append_message(conversation_id, Message::user(message))
            .await
            .map_err(HiveError::Storage)?;

        let mut request = TurnRequest::new(conversation_id, message)
            .with_force_web_search(force_web_search)
            .with_pending_plan(pending_plan);
        if let Some(user_id) = user_id {
            request = request.with_user(user_id);
        }

        let response = match self.engine.handle_turn(request).await {
            Ok(response) => response,
            Err(e) => {
                self.preserve_failed_turn(storage.as_ref(), conversation_id).await;
                return Err(e);
            }
        };

        let persisted = match response.plan.as_ref().filter(|p| p.is_pending()) {
            Some(plan) => storage.save_plan(conversation_id, plan).await,
            None => storage.clear_plan(conversation_id).await,
        };
        persisted.map_err(HiveError::Storage)?;

        storage
            .append_message(conversation_id, Message::assistant(response.response.clone()))
            .await
            .map_err(HiveError::Storage)?;

        Ok(response)
    }

    /// 调用方主动取消待续计划；没有计划时返回 false
    pub async fn cancel_plan(&self, conversation_id: &str) -> Result<bool, HiveError> {
        let storage = self.engine.storage().open();
        let Some(mut plan) = storage
            .load_plan(conversation_id)
            .await
            .map_err(HiveError::Storage)?
        else {
            return Ok(false);
        };

        plan.mark_dirty();
        self.engine
            .discard_pending_plan(conversation_id, &plan, "cancelled")
            .await;
        storage
            .clear_plan(conversation_id)
            .await
            .map_err(HiveError::Storage)?;
        Ok(true)
    }

    async fn preserve_failed_turn(&self, storage: &dyn Storage, conversation_id: &str) {
        if let Err(e) = storage
            .append_message(conversation_id, Message::assistant(FALLBACK_ERROR_REPLY))
            .await
        {
            tracing::warn!(conversation = %conversation_id, error = %e, "Failed to store fallback reply");
        }
    }
}
