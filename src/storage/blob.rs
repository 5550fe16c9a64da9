//! Blob store: S3-compatible object storage for uploaded log files.
//!
//! Keys follow `{tenant}/{job}/{filename}` and are only ever formed inside
//! this adapter; operations taking a pre-built key reject anything that does
//! not begin with the requesting tenant's id, so a cross-tenant key cannot be
//! smuggled in from a call site.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone)]
pub struct BlobRef {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        filename: &str,
        bytes: Bytes,
    ) -> ApiResult<BlobRef>;

    /// Stream an object to a local file, returning the byte count.
    async fn download_to(&self, tenant_id: Uuid, key: &str, dest: &Path) -> ApiResult<u64>;

    async fn delete(&self, tenant_id: Uuid, key: &str) -> ApiResult<()>;

    async fn ping(&self) -> ApiResult<()>;
}

pub struct S3BlobStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self { store, bucket: bucket.into() }
    }

    pub fn connect(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        use_tls: bool,
    ) -> ApiResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_bucket_name(bucket)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_allow_http(!use_tls)
            .with_region("us-east-1")
            .build()
            .map_err(ApiError::from)?;
        Ok(Self::new(Arc::new(store), bucket))
    }

    fn object_key(tenant_id: Uuid, job_id: Uuid, filename: &str) -> String {
        // Filenames are user-supplied; encode anything that could escape the
        // prefix or confuse the key space.
        format!("{}/{}/{}", tenant_id, job_id, urlencoding::encode(filename))
    }

    fn check_tenant_key(tenant_id: Uuid, key: &str) -> ApiResult<()> {
        let prefix = format!("{}/", tenant_id);
        if key.starts_with(&prefix) && !key.contains("..") {
            Ok(())
        } else {
            Err(ApiError::unauthorized("blob key is not scoped to the tenant"))
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        tenant_id: Uuid,
        job_id: Uuid,
        filename: &str,
        bytes: Bytes,
    ) -> ApiResult<BlobRef> {
        let key = Self::object_key(tenant_id, job_id, filename);
        self.store
            .put(&ObjectPath::from(key.as_str()), bytes)
            .await?;
        Ok(BlobRef { bucket: self.bucket.clone(), key })
    }

    async fn download_to(&self, tenant_id: Uuid, key: &str, dest: &Path) -> ApiResult<u64> {
        Self::check_tenant_key(tenant_id, key)?;

        let result = self.store.get(&ObjectPath::from(key)).await?;
        let mut stream = result.into_stream();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| ApiError::internal(format!("create temp file: {}", e)))?;

        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::internal(format!("write temp file: {}", e)))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::internal(format!("flush temp file: {}", e)))?;
        Ok(written)
    }

    async fn delete(&self, tenant_id: Uuid, key: &str) -> ApiResult<()> {
        Self::check_tenant_key(tenant_id, key)?;
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }

    async fn ping(&self) -> ApiResult<()> {
        // A list on a bogus prefix is enough to prove reachability.
        let mut listing = self.store.list(Some(&ObjectPath::from("health-probe")));
        match listing.next().await {
            None | Some(Ok(_)) => Ok(()),
            Some(Err(object_store::Error::NotFound { .. })) => Ok(()),
            Some(Err(err)) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_tenant_prefixed() {
        let tenant = Uuid::nil();
        let job = Uuid::nil();
        let key = S3BlobStore::object_key(tenant, job, "arserver.log");
        assert!(key.starts_with("00000000-0000-0000-0000-000000000000/"));
        assert!(key.ends_with("arserver.log"));
    }

    #[test]
    fn filenames_cannot_escape_the_prefix() {
        let key = S3BlobStore::object_key(Uuid::nil(), Uuid::nil(), "../../other/secret.log");
        assert!(!key.contains("/../"));
    }

    #[test]
    fn cross_tenant_keys_are_rejected() {
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(S3BlobStore::check_tenant_key(tenant, &format!("{}/job/file", tenant)).is_ok());
        assert!(S3BlobStore::check_tenant_key(tenant, &format!("{}/job/file", other)).is_err());
        assert!(S3BlobStore::check_tenant_key(tenant, "relative/key").is_err());
    }
}
