//! AI stream proxy.
//!
//! Orchestrates one chat turn: rate limit, job ownership, conversation
//! bootstrap, skill resolution, the streaming completion, and persistence of
//! both sides of the exchange. Events are pushed into an mpsc channel that
//! the SSE handler drains; the handler flushes after every event so tokens
//! reach the client as they are produced.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{JobStatus, MessageRole, MessageStatus, NewMessage};
use crate::pipeline::IngestionPipeline;
use crate::storage::{Cache, MetadataStore, NewAiInteraction};
use crate::utils::{truncate_at_word_boundary, ApiError, ApiResult};

use super::client::{ChatMessage, CompletionBackend};
use super::conversation::ConversationService;
use super::router;
use super::skills::{system_prompt_for, Skill};

/// Per-user AI quota: 20 queries per sliding minute.
const RATE_LIMIT: u64 = 20;
const RATE_WINDOW: Duration = Duration::from_secs(60);
const RATE_RESOURCE: &str = "ai";

const TITLE_MAX_CHARS: usize = 80;
/// Rough character budget for the job context payload (~4 chars per token).
const CONTEXT_TOKEN_BUDGET: usize = 6_000;
/// Conversation history carried into the completion, newest kept.
const HISTORY_MESSAGES: i64 = 20;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub query: String,
    pub job_id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub skill_name: Option<String>,
    #[serde(default = "default_auto_route")]
    pub auto_route: bool,
}

fn default_auto_route() -> bool {
    true
}

/// Ordered events of one chat turn, mapped 1:1 onto named SSE events.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Skill { skill: Skill },
    Token { text: String },
    Metadata { tokens_used: i32, latency_ms: i64, follow_ups: Vec<String> },
    Done,
    Error { message: String },
}

pub struct ChatService {
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<dyn Cache>,
    conversations: Arc<ConversationService>,
    client: Arc<dyn CompletionBackend>,
}

impl ChatService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        cache: Arc<dyn Cache>,
        conversations: Arc<ConversationService>,
        client: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self { metadata, cache, conversations, client }
    }

    /// Pre-flight checks that must reject before the SSE stream opens: the
    /// rate limit and job ownership.
    pub async fn authorize(&self, tenant_id: Uuid, user_id: &str, req: &ChatRequest)
        -> ApiResult<()> {
        let decision = self
            .cache
            .rate_limit(tenant_id, user_id, RATE_RESOURCE, RATE_LIMIT, RATE_WINDOW)
            .await?;
        if !decision.allowed {
            return Err(ApiError::RateLimited { retry_after_secs: decision.retry_after_secs });
        }

        let job = self
            .metadata
            .get_job(tenant_id, req.job_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("job {}", req.job_id)))?;
        if job.status != JobStatus::Complete {
            return Err(ApiError::not_ready(job.status.as_str()));
        }
        Ok(())
    }

    /// Run the turn, emitting events into `tx`. Cancellation (client
    /// disconnect) aborts the provider stream promptly and still persists the
    /// partial assistant message so history reflects what the user saw.
    pub async fn stream_turn(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: ChatRequest,
        tx: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) {
        if let Err(err) = self
            .run_turn(tenant_id, user_id, &req, &tx, &cancel)
            .await
        {
            let message = match &err {
                ApiError::Cancelled => "cancelled".to_string(),
                ApiError::RateLimited { .. } => err.to_string(),
                ApiError::NotFound(_) | ApiError::NotReady { .. } => err.to_string(),
                other => {
                    tracing::error!(error = %other, "chat turn failed");
                    "The assistant could not complete this request".to_string()
                }
            };
            let _ = tx.send(ChatEvent::Error { message }).await;
        }
    }

    async fn run_turn(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: &ChatRequest,
        tx: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        // Conversation bootstrap: derive a title from the first query.
        let conversation = match req.conversation_id {
            Some(id) => self.conversations.get(tenant_id, id).await?,
            None => {
                let title = truncate_at_word_boundary(&req.query, TITLE_MAX_CHARS);
                self.conversations
                    .create(tenant_id, user_id, req.job_id, Some(title))
                    .await?
            }
        };

        self.conversations
            .add_message(
                tenant_id,
                NewMessage {
                    conversation_id: conversation.id,
                    role: MessageRole::User,
                    content: req.query.clone(),
                    skill_name: None,
                    follow_ups: None,
                    tokens_used: None,
                    latency_ms: None,
                    status: MessageStatus::Complete,
                    error_message: None,
                },
            )
            .await?;

        // An explicit skill always wins over keyword routing.
        let forced = req.skill_name.as_deref().and_then(Skill::parse);
        let skill = router::route(&req.query, forced);
        let _ = tx.send(ChatEvent::Skill { skill }).await;

        let messages = self
            .build_messages(tenant_id, req.job_id, conversation.id, skill, &req.query)
            .await?;

        let started = Instant::now();
        let delta_tx = tx.clone();
        let mut forward_delta = move |delta: &str| {
            let _ = delta_tx.try_send(ChatEvent::Token { text: delta.to_string() });
        };
        let outcome = self
            .client
            .stream_completion(messages, cancel, &mut forward_delta)
            .await;

        let latency_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(outcome) if outcome.cancelled => {
                self.persist_assistant(
                    tenant_id,
                    conversation.id,
                    skill,
                    outcome.content,
                    None,
                    None,
                    latency_ms,
                    MessageStatus::Error,
                    Some("cancelled".to_string()),
                )
                .await?;
                self.audit(tenant_id, user_id, req, conversation.id, skill, 0, latency_ms, false)
                    .await;
                Err(ApiError::Cancelled)
            }
            Ok(outcome) => {
                let tokens_used = outcome.prompt_tokens + outcome.completion_tokens;
                let follow_ups = extract_follow_ups(&outcome.content);
                self.persist_assistant(
                    tenant_id,
                    conversation.id,
                    skill,
                    outcome.content,
                    Some(tokens_used),
                    follow_ups.clone(),
                    latency_ms,
                    MessageStatus::Complete,
                    None,
                )
                .await?;
                self.audit(
                    tenant_id,
                    user_id,
                    req,
                    conversation.id,
                    skill,
                    tokens_used,
                    latency_ms,
                    true,
                )
                .await;

                let _ = tx
                    .send(ChatEvent::Metadata {
                        tokens_used,
                        latency_ms,
                        follow_ups: follow_ups.unwrap_or_default(),
                    })
                    .await;
                let _ = tx.send(ChatEvent::Done).await;
                Ok(())
            }
            Err(err) => {
                self.persist_assistant(
                    tenant_id,
                    conversation.id,
                    skill,
                    String::new(),
                    None,
                    None,
                    latency_ms,
                    MessageStatus::Error,
                    Some(err.to_string()),
                )
                .await?;
                self.audit(tenant_id, user_id, req, conversation.id, skill, 0, latency_ms, false)
                    .await;
                Err(err)
            }
        }
    }

    /// System prompt + job context + bounded history + the query. When the
    /// natural context exceeds the budget the oldest history drops first,
    /// then the log excerpt shrinks.
    async fn build_messages(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        conversation_id: Uuid,
        skill: Skill,
        query: &str,
    ) -> ApiResult<Vec<ChatMessage>> {
        let mut budget = CONTEXT_TOKEN_BUDGET * 4;

        let context = self.job_context(tenant_id, job_id).await;
        let context = if context.len() > budget / 2 {
            truncate_at_word_boundary(&context, budget / 2)
        } else {
            context
        };
        budget = budget.saturating_sub(context.len());

        let system = format!(
            "{}\n\nAnalysis context for job {}:\n{}",
            system_prompt_for(skill),
            job_id,
            context
        );

        let history = self
            .metadata
            .get_messages(tenant_id, conversation_id, HISTORY_MESSAGES, 0)
            .await?;
        let mut recent: Vec<ChatMessage> = Vec::new();
        // Newest first until the budget runs out, then restore order.
        for message in history.iter().rev() {
            if message.content.len() > budget {
                break;
            }
            budget -= message.content.len();
            recent.push(match message.role {
                MessageRole::User => ChatMessage::user(&message.content),
                MessageRole::Assistant => ChatMessage::assistant(&message.content),
            });
        }
        recent.reverse();

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(recent);
        // The user message was already persisted; make sure the model sees it
        // even when history pagination missed it.
        if !messages.iter().any(|m| m.role == "user" && m.content == query) {
            messages.push(ChatMessage::user(query));
        }
        Ok(messages)
    }

    /// Job-scoped context payload: the cached analyzer summary plus the top
    /// exceptions, truncated to the most recent entries when oversized.
    async fn job_context(&self, tenant_id: Uuid, job_id: Uuid) -> String {
        let key = IngestionPipeline::parse_result_key(tenant_id, job_id);
        let Ok(Some(json)) = self.cache.get(&key).await else {
            return "No analyzer report is available for this job.".to_string();
        };
        let Ok(result) = serde_json::from_str::<crate::parser::ParseResult>(&json) else {
            return "No analyzer report is available for this job.".to_string();
        };

        let mut context = String::new();
        if let Ok(general) = serde_json::to_string_pretty(&result.general) {
            context.push_str("General statistics:\n");
            context.push_str(&general);
            context.push('\n');
        }
        if !result.top_api.is_empty() {
            context.push_str("\nSlowest API calls:\n");
            for entry in result.top_api.iter().take(10) {
                context.push_str(&format!(
                    "- line {} {} {} on {} by {} took {}ms (queue {}ms, success={})\n",
                    entry.line_number,
                    entry.timestamp,
                    entry.identifier,
                    entry.form,
                    entry.user,
                    entry.duration_ms,
                    entry.queue_time_ms,
                    entry.success,
                ));
            }
        }
        if !result.exceptions.api_errors.is_empty() {
            context.push_str("\nAPI errors:\n");
            for error in result.exceptions.api_errors.iter().take(10) {
                context.push_str(&format!(
                    "- line {} {} {} on {} by {}: {}\n",
                    error.end_line,
                    error.start_time,
                    error.api_code,
                    error.form,
                    error.user,
                    error.error_text,
                ));
            }
        }
        context
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_assistant(
        &self,
        tenant_id: Uuid,
        conversation_id: Uuid,
        skill: Skill,
        content: String,
        tokens_used: Option<i32>,
        follow_ups: Option<Vec<String>>,
        latency_ms: i64,
        status: MessageStatus,
        error_message: Option<String>,
    ) -> ApiResult<()> {
        self.conversations
            .add_message(
                tenant_id,
                NewMessage {
                    conversation_id,
                    role: MessageRole::Assistant,
                    content,
                    skill_name: Some(skill.as_str().to_string()),
                    follow_ups,
                    tokens_used,
                    latency_ms: Some(latency_ms),
                    status,
                    error_message,
                },
            )
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        req: &ChatRequest,
        conversation_id: Uuid,
        skill: Skill,
        tokens_used: i32,
        latency_ms: i64,
        success: bool,
    ) {
        let interaction = NewAiInteraction {
            user_id: user_id.to_string(),
            job_id: req.job_id,
            conversation_id: Some(conversation_id),
            skill_name: skill.as_str().to_string(),
            query: req.query.clone(),
            tokens_used,
            latency_ms,
            success,
        };
        if let Err(err) = self.metadata.record_interaction(tenant_id, interaction).await {
            tracing::warn!(error = %err, "failed to record AI interaction");
        }
    }
}

/// Follow-up suggestions are post-processed from the closing section of the
/// response, never a separate completion. Returns `None` when the model did
/// not produce the section.
pub fn extract_follow_ups(content: &str) -> Option<Vec<String>> {
    let lower = content.to_lowercase();
    let marker = lower.rfind("follow-up")?;
    let tail = &content[marker..];
    let mut follow_ups = Vec::new();
    for line in tail.lines().skip(1) {
        let trimmed = line.trim();
        let item = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
            .or_else(|| {
                trimmed
                    .split_once(". ")
                    .filter(|(n, _)| n.chars().all(|c| c.is_ascii_digit()))
                    .map(|(_, rest)| rest)
            });
        if let Some(item) = item {
            if !item.is_empty() {
                follow_ups.push(item.trim().to_string());
            }
        }
        if follow_ups.len() == 5 {
            break;
        }
    }
    if follow_ups.is_empty() {
        None
    } else {
        Some(follow_ups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bulleted_follow_ups() {
        let content = "Main answer here.\n\nFollow-up questions:\n- Which user was affected?\n- Did it recur?\n";
        let follow_ups = extract_follow_ups(content).unwrap();
        assert_eq!(follow_ups, vec!["Which user was affected?", "Did it recur?"]);
    }

    #[test]
    fn extracts_numbered_follow_ups() {
        let content = "Answer.\nFollow-up questions:\n1. First one?\n2. Second one?\n";
        let follow_ups = extract_follow_ups(content).unwrap();
        assert_eq!(follow_ups, vec!["First one?", "Second one?"]);
    }

    #[test]
    fn absent_section_yields_none() {
        assert!(extract_follow_ups("Just an answer with no closing section.").is_none());
    }
}
