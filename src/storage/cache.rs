//! Cache: Redis adapter with tenant-scoped keys.
//!
//! Every key is built through [`TenantKey`], which prepends the tenant id, so
//! a bare (cross-tenant) key cannot be formed at a call site. Also hosts the
//! sliding-window rate limiter used by the AI surface.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::utils::ApiResult;

/// A cache key with the tenant id baked in.
///
/// `TenantKey::new(t, &["parseresult", job])` renders `{t}:parseresult:{job}`;
/// `TenantKey::prefixed("cache", ...)` renders `cache:{t}:...` for the keys
/// that carry a namespace prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(tenant_id: Uuid, parts: &[&str]) -> Self {
        let mut key = tenant_id.to_string();
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        Self(key)
    }

    pub fn prefixed(prefix: &str, tenant_id: Uuid, parts: &[&str]) -> Self {
        let mut key = format!("{}:{}", prefix, tenant_id);
        for part in parts {
            key.push(':');
            key.push_str(part);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the oldest hit leaves the window; only meaningful when
    /// denied.
    pub retry_after_secs: u64,
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &TenantKey) -> ApiResult<Option<String>>;
    async fn set(&self, key: &TenantKey, value: &str, ttl: Duration) -> ApiResult<()>;
    async fn delete(&self, key: &TenantKey) -> ApiResult<()>;

    /// Sliding-window limiter for `(tenant, user, resource)`: at most `limit`
    /// hits within `window`.
    async fn rate_limit(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        resource: &str,
        limit: u64,
        window: Duration,
    ) -> ApiResult<RateDecision>;

    async fn ping(&self) -> ApiResult<()>;
}

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> ApiResult<Self> {
        let client = redis::Client::open(url)
            .map_err(crate::utils::ApiError::from)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(crate::utils::ApiError::from)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &TenantKey) -> ApiResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key.as_str()).await?;
        Ok(value)
    }

    async fn set(&self, key: &TenantKey, value: &str, ttl: Duration) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key.as_str(), value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete(&self, key: &TenantKey) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key.as_str()).await?;
        Ok(())
    }

    async fn rate_limit(
        &self,
        tenant_id: Uuid,
        user_id: &str,
        resource: &str,
        limit: u64,
        window: Duration,
    ) -> ApiResult<RateDecision> {
        let key = TenantKey::prefixed("rate", tenant_id, &[resource, user_id]);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window.as_millis() as i64;
        let floor = now_ms - window_ms;

        let mut conn = self.conn.clone();
        // Trim the window, count what remains, then record this hit only if
        // it is admitted.
        let (count, oldest): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key.as_str())
            .arg("-inf")
            .arg(floor)
            .ignore()
            .cmd("ZCARD")
            .arg(key.as_str())
            .cmd("ZRANGE")
            .arg(key.as_str())
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;

        if count >= limit {
            let retry_after_secs = oldest
                .first()
                .map(|(_, score)| {
                    let expires_at = *score as i64 + window_ms;
                    ((expires_at - now_ms).max(0) as u64).div_ceil(1000)
                })
                .unwrap_or(window.as_secs());
            return Ok(RateDecision { allowed: false, retry_after_secs });
        }

        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key.as_str())
            .arg(now_ms)
            .arg(format!("{}:{}", now_ms, Uuid::new_v4()))
            .ignore()
            .cmd("EXPIRE")
            .arg(key.as_str())
            .arg(window.as_secs() + 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(RateDecision { allowed: true, retry_after_secs: 0 })
    }

    async fn ping(&self) -> ApiResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
