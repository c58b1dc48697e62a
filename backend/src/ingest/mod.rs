//! File ingest: single-use upload URLs, blob storage and file resolution.
//!
//! An upload URL carries a random token. Only the token's SHA-256 is stored,
//! so a leaked database does not leak usable upload URLs.

mod blob;

pub use blob::BlobStorage;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use receipt_common::ResourceKind;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::store::{FileObject, Store, StoreError, UploadTarget};

/// Upload URL handed to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedUpload {
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

/// A stored file together with the URL it can be fetched from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFile {
    #[serde(flatten)]
    pub file: FileObject,
    pub url: String,
}

#[derive(Debug)]
pub struct FileIngest {
    store: Arc<Store>,
    blobs: BlobStorage,
    public_url: String,
    upload_ttl: Duration,
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl FileIngest {
    pub fn new(store: Arc<Store>, config: &StorageConfig) -> Result<Self, StoreError> {
        let upload_ttl = i64::try_from(config.upload_url_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!(
                    "upload_url_ttl_secs out of range: {}",
                    config.upload_url_ttl_secs
                ))
            })?;

        Ok(Self {
            store,
            blobs: BlobStorage::new(&config.dir)?,
            public_url: config.public_url.trim_end_matches('/').to_string(),
            upload_ttl,
        })
    }

    /// Issue a single-use upload URL.
    ///
    /// Refused up front when the user has no receipt quota left this month,
    /// since the upload could not become a receipt anyway.
    pub fn generate_upload_target(&self, user_id: &str, now: DateTime<Utc>) -> Result<IssuedUpload, StoreError> {
        let expires_at = now
            .checked_add_signed(self.upload_ttl)
            .ok_or_else(|| StoreError::InvalidConfig("upload URL expiry out of range".to_string()))?;
        self.store.check_quota(user_id, ResourceKind::Receipts, now)?;

        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let target = UploadTarget {
            token_hash: hash_token(&token),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at,
            used_at: None,
        };
        self.store.insert_upload_target(&target)?;

        tracing::debug!("Issued upload URL for {} (expires {})", user_id, target.expires_at);
        Ok(IssuedUpload {
            upload_url: format!("{}/api/uploads/{}", self.public_url, token),
            expires_at: target.expires_at,
        })
    }

    /// Store the bytes sent to an upload URL and consume the URL.
    pub async fn accept_upload(
        &self,
        token: &str,
        content_type: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<FileObject, StoreError> {
        let token_hash = hash_token(token);
        let target = self.store.get_upload_target(&token_hash)?;
        target.check_usable(now)?;

        let file = FileObject {
            id: Uuid::new_v4().to_string(),
            user_id: target.user_id,
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(bytes)),
            created_at: now,
        };

        self.blobs.write(&file.id, bytes).await?;
        if let Err(e) = self.store.complete_upload(&token_hash, &file, now) {
            if let Err(cleanup) = self.blobs.delete(&file.id).await {
                tracing::warn!("Failed to remove orphaned blob {}: {}", file.id, cleanup);
            }
            return Err(e);
        }

        tracing::info!(
            "Stored file {} for {} ({} bytes, {})",
            file.id,
            file.user_id,
            file.size,
            file.content_type
        );
        Ok(file)
    }

    /// Public URL the content of `file_id` is served from.
    pub fn file_url(&self, file_id: &str) -> String {
        format!("{}/api/files/{}/content", self.public_url, file_id)
    }

    pub fn resolve(&self, file_id: &str) -> Result<ResolvedFile, StoreError> {
        let file = self.store.get_file(file_id)?;
        let url = self.file_url(&file.id);
        Ok(ResolvedFile { file, url })
    }

    pub async fn read(&self, file_id: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs.read(file_id).await
    }

    pub async fn delete(&self, file_id: &str) -> Result<(), StoreError> {
        self.store.delete_file(file_id)?;
        self.blobs.delete(file_id).await?;
        tracing::info!("Deleted file {}", file_id);
        Ok(())
    }

    /// Whether the file was uploaded as `application/pdf`. Content is not sniffed.
    pub fn is_pdf(&self, file_id: &str) -> Result<bool, StoreError> {
        let file = self.store.get_file(file_id)?;
        Ok(file.content_type.eq_ignore_ascii_case("application/pdf"))
    }
}
