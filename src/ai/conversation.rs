//! Conversation store service.
//!
//! Thin orchestration over the metadata store: ownership checks and
//! pagination. Counters (`message_count`, `last_message_at`, `updated_at`)
//! are maintained by the store's triggers; nothing here touches them.

use std::sync::Arc;

use uuid::Uuid;

use crate::models::{Conversation, Message, NewMessage};
use crate::storage::MetadataStore;
use crate::utils::{ApiError, ApiResult};

pub struct ConversationService {
    metadata: Arc<dyn MetadataStore>,
}

impl ConversationService {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    pub async fn create(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Uuid,
        title: Option<String>,
    ) -> ApiResult<Conversation> {
        self.metadata
            .get_job(tenant_id, job_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("job {}", job_id)))?;
        self.metadata
            .create_conversation(tenant_id, user_id, job_id, title)
            .await
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Conversation> {
        self.metadata
            .get_conversation(tenant_id, id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("conversation {}", id)))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        job_id: Option<Uuid>,
    ) -> ApiResult<Vec<Conversation>> {
        self.metadata.list_conversations(tenant_id, user_id, job_id).await
    }

    /// Cascade delete: messages go with the conversation.
    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<()> {
        if !self.metadata.delete_conversation(tenant_id, id).await? {
            return Err(ApiError::not_found(format!("conversation {}", id)));
        }
        Ok(())
    }

    pub async fn add_message(&self, tenant_id: Uuid, message: NewMessage) -> ApiResult<Message> {
        self.metadata.add_message(tenant_id, message).await
    }

    pub async fn messages(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> ApiResult<Vec<Message>> {
        // Surface not_found for a missing conversation rather than an empty
        // page.
        self.get(tenant_id, conversation_id).await?;
        self.metadata
            .get_messages(tenant_id, conversation_id, limit.clamp(1, 500), offset.max(0))
            .await
    }
}
