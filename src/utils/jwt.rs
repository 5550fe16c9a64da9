use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};

/// Claims carried by tokens issued by the external identity provider.
///
/// The core never issues end-user tokens itself; it only verifies them with
/// the shared secret and lifts the tenant / subject pair into the request
/// context. `encode_token` exists for tests and local tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque user identifier.
    pub sub: String,
    /// Tenant (organization) UUID as issued by the directory.
    pub tenant_id: String,
    pub exp: i64,
    pub iat: i64,
}

pub struct JwtUtil {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtUtil {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|err| ApiError::unauthorized(format!("JWT verification failed: {}", err)))
    }

    pub fn encode_token(&self, user_id: &str, tenant_id: &str, ttl_hours: i64) -> ApiResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(ttl_hours)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| ApiError::internal(format!("JWT encoding failed: {}", err)))
    }
}
