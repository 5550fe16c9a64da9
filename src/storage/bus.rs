//! Message bus: job lifecycle events and live-tail fan-out.
//!
//! Two delivery models over Redis, matching the subject guarantees:
//!
//! - `jobs.<tenant>.submit` is a stream consumed through a consumer group
//!   with explicit acks: at-least-once, so the ingestion pipeline must stay
//!   idempotent on redelivery.
//! - `jobs.<tenant>.progress`, `jobs.<tenant>.complete` and
//!   `logs.<tenant>.tail.<log_type>` are pub/sub: fire-and-forget, loss is
//!   tolerated because the durable truth lives in the metadata store.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{JobStatus, LogEntry, LogType};
use crate::utils::{ApiError, ApiResult};

const SUBMIT_GROUP: &str = "ingest";
const ACTIVE_TENANTS_KEY: &str = "jobs.active_tenants";
/// Unacked deliveries older than this are reclaimed from dead consumers.
const RECLAIM_IDLE_MS: usize = 60_000;

pub fn submit_subject(tenant_id: Uuid) -> String {
    format!("jobs.{}.submit", tenant_id)
}

pub fn progress_subject(tenant_id: Uuid) -> String {
    format!("jobs.{}.progress", tenant_id)
}

pub fn complete_subject(tenant_id: Uuid) -> String {
    format!("jobs.{}.complete", tenant_id)
}

pub fn tail_subject(tenant_id: Uuid, log_type: LogType) -> String {
    format!("logs.{}.tail.{}", tenant_id, log_type.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitEvent {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress_pct: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_lines: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompleteEvent {
    pub job_id: Uuid,
    pub success: bool,
}

/// One in-flight submission. Must be acked after the pipeline persists the
/// terminal state; an unacked delivery is redelivered.
#[derive(Debug, Clone)]
pub struct SubmitDelivery {
    pub tenant_id: Uuid,
    pub job_id: Uuid,
    stream: String,
    entry_id: String,
}

impl SubmitDelivery {
    pub(crate) fn new(tenant_id: Uuid, job_id: Uuid, stream: String, entry_id: String) -> Self {
        Self { tenant_id, job_id, stream, entry_id }
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_submit(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()>;

    /// Block until the next submission arrives (or the poll interval lapses,
    /// yielding `None`). Worker loops call this repeatedly.
    async fn next_submission(&self) -> ApiResult<Option<SubmitDelivery>>;
    async fn ack_submission(&self, delivery: &SubmitDelivery) -> ApiResult<()>;

    async fn publish_progress(&self, tenant_id: Uuid, event: &ProgressEvent) -> ApiResult<()>;
    async fn publish_complete(&self, tenant_id: Uuid, event: &CompleteEvent) -> ApiResult<()>;
    async fn publish_tail(&self, tenant_id: Uuid, entry: &LogEntry) -> ApiResult<()>;

    async fn subscribe_progress(
        &self,
        tenant_id: Uuid,
    ) -> ApiResult<BoxStream<'static, ProgressEvent>>;

    async fn ping(&self) -> ApiResult<()>;
}

pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
    consumer: String,
}

impl RedisBus {
    pub async fn connect(url: &str) -> ApiResult<Self> {
        let client = redis::Client::open(url).map_err(ApiError::from)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(ApiError::from)?;
        Ok(Self {
            client,
            conn,
            consumer: format!("worker-{}", Uuid::new_v4()),
        })
    }

    async fn ensure_group(&self, stream: &str) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(stream, SUBMIT_GROUP, "0")
            .await;
        match created {
            Ok(()) => Ok(()),
            // BUSYGROUP means the group already exists.
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn parse_delivery(
        stream: &str,
        entry_id: &str,
        payload: Option<&redis::Value>,
    ) -> Option<SubmitDelivery> {
        // Stream key shape: jobs.<tenant>.submit
        let tenant_id: Uuid = stream.split('.').nth(1)?.parse().ok()?;
        let json = match payload? {
            redis::Value::BulkString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            redis::Value::SimpleString(s) => s.clone(),
            _ => return None,
        };
        let event: SubmitEvent = serde_json::from_str(&json).ok()?;
        Some(SubmitDelivery {
            tenant_id,
            job_id: event.job_id,
            stream: stream.to_string(),
            entry_id: entry_id.to_string(),
        })
    }

    /// Hand back deliveries stranded on dead consumers before reading new
    /// ones.
    async fn reclaim_one(&self, stream: &str) -> ApiResult<Option<SubmitDelivery>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(SUBMIT_GROUP)
            .arg(&self.consumer)
            .arg(RECLAIM_IDLE_MS)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        for claimed in reply.claimed {
            if let Some(delivery) =
                Self::parse_delivery(stream, &claimed.id, claimed.map.get("event"))
            {
                return Ok(Some(delivery));
            }
            // Unparseable entry: ack it away so it cannot wedge the group.
            let _: () = conn.xack(stream, SUBMIT_GROUP, &[&claimed.id]).await?;
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish_submit(&self, tenant_id: Uuid, job_id: Uuid) -> ApiResult<()> {
        let stream = submit_subject(tenant_id);
        let payload = serde_json::to_string(&SubmitEvent { job_id })?;
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(ACTIVE_TENANTS_KEY, tenant_id.to_string()).await?;
        let _: String = conn.xadd(&stream, "*", &[("event", payload.as_str())]).await?;
        Ok(())
    }

    async fn next_submission(&self) -> ApiResult<Option<SubmitDelivery>> {
        let mut conn = self.conn.clone();
        let tenants: Vec<String> = conn.smembers(ACTIVE_TENANTS_KEY).await?;
        if tenants.is_empty() {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            return Ok(None);
        }

        let streams: Vec<String> = tenants
            .iter()
            .filter_map(|t| t.parse::<Uuid>().ok())
            .map(submit_subject)
            .collect();

        for stream in &streams {
            self.ensure_group(stream).await?;
            if let Some(delivery) = self.reclaim_one(stream).await? {
                return Ok(Some(delivery));
            }
        }

        let ids: Vec<&str> = streams.iter().map(|_| ">").collect();
        let options = StreamReadOptions::default()
            .group(SUBMIT_GROUP, &self.consumer)
            .count(1)
            .block(5_000);
        let reply: StreamReadReply = conn
            .xread_options(
                &streams.iter().map(String::as_str).collect::<Vec<_>>(),
                &ids,
                &options,
            )
            .await?;

        for key in reply.keys {
            for entry in key.ids {
                if let Some(delivery) =
                    Self::parse_delivery(&key.key, &entry.id, entry.map.get("event"))
                {
                    return Ok(Some(delivery));
                }
                let _: () = conn.xack(&key.key, SUBMIT_GROUP, &[&entry.id]).await?;
            }
        }
        Ok(None)
    }

    async fn ack_submission(&self, delivery: &SubmitDelivery) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .xack(&delivery.stream, SUBMIT_GROUP, &[&delivery.entry_id])
            .await?;
        Ok(())
    }

    async fn publish_progress(&self, tenant_id: Uuid, event: &ProgressEvent) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(event)?;
        let _: () = conn.publish(progress_subject(tenant_id), payload).await?;
        Ok(())
    }

    async fn publish_complete(&self, tenant_id: Uuid, event: &CompleteEvent) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(event)?;
        let _: () = conn.publish(complete_subject(tenant_id), payload).await?;
        Ok(())
    }

    async fn publish_tail(&self, tenant_id: Uuid, entry: &LogEntry) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(entry)?;
        let _: () = conn
            .publish(tail_subject(tenant_id, entry.log_type), payload)
            .await?;
        Ok(())
    }

    async fn subscribe_progress(
        &self,
        tenant_id: Uuid,
    ) -> ApiResult<BoxStream<'static, ProgressEvent>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(ApiError::from)?;
        pubsub
            .subscribe(progress_subject(tenant_id))
            .await
            .map_err(ApiError::from)?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                let payload: String = msg.get_payload().ok()?;
                serde_json::from_str::<ProgressEvent>(&payload).ok()
            })
            .boxed();
        Ok(stream)
    }

    async fn ping(&self) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_are_tenant_scoped() {
        let tenant = Uuid::nil();
        assert_eq!(
            submit_subject(tenant),
            "jobs.00000000-0000-0000-0000-000000000000.submit"
        );
        assert_eq!(
            tail_subject(tenant, LogType::Sql),
            "logs.00000000-0000-0000-0000-000000000000.tail.SQL"
        );
    }

    #[test]
    fn progress_event_omits_empty_fields() {
        let event = ProgressEvent {
            job_id: Uuid::nil(),
            status: JobStatus::Parsing,
            progress_pct: 30,
            processed_lines: None,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("processed_lines"));
        assert!(!json.contains("error"));
        assert!(json.contains("\"status\":\"parsing\""));
    }
}
