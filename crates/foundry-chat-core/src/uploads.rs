//! Tracked document uploads.
//!
//! Each file in a batch gets its own [`UploadRecord`], keyed by a fresh id so two
//! files with the same name never share a status. Records move exactly once from
//! `Uploading` to `Success` or `Error`; failures are recorded, never retried.
//!
//! The status list is published through a `watch` channel. Every update swaps in a
//! new `Arc<Vec<_>>`, so a subscriber holding an older snapshot never sees it change.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

use crate::config::{BasicAuth, ClientConfig, DEFAULT_UPLOAD_CONCURRENCY};
use crate::error::{ChatError, ChatResult};

/// Message stored when the request never produced a response.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Success,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::Uploading)
    }
}

/// Lifecycle of one upload attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_count: Option<u64>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    fn uploading(filename: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            status: UploadStatus::Uploading,
            message: None,
            chunks_count: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Terminal copy of this record for the given outcome.
    fn resolved(&self, outcome: &UploadOutcome) -> Self {
        let mut next = self.clone();
        next.finished_at = Some(Utc::now());
        match outcome {
            UploadOutcome::Accepted {
                message,
                chunks_count,
            } => {
                next.status = UploadStatus::Success;
                next.message = Some(message.clone());
                next.chunks_count = Some(*chunks_count);
            }
            UploadOutcome::Rejected { error } => {
                next.status = UploadStatus::Error;
                next.message = Some(error.clone());
            }
            UploadOutcome::Transport => {
                next.status = UploadStatus::Error;
                next.message = Some(NETWORK_ERROR_MESSAGE.to_string());
            }
        }
        next
    }
}

/// A file queued for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Read a file from disk; the upload name is its final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChatError::Config(format!("Not a file path: {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { filename, bytes })
    }
}

/// What the backend said about one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 2xx with `{message, chunks_count}`.
    Accepted { message: String, chunks_count: u64 },
    /// Non-2xx with `{error}`.
    Rejected { error: String },
    /// No usable response at all.
    Transport,
}

/// Sends a single file to the backend.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &UploadFile) -> UploadOutcome;
}

/// Notified once per successful upload (e.g. to refresh a document list).
pub trait UploadObserver: Send + Sync {
    fn on_upload_succeeded(&self, record: &UploadRecord);
}

#[derive(Deserialize)]
struct AcceptedBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    chunks_count: u64,
}

#[derive(Deserialize)]
struct RejectedBody {
    #[serde(default)]
    error: Option<String>,
}

/// `POST {base}/upload` as multipart with a single `file` field.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    auth: Option<BasicAuth>,
}

impl HttpUploader {
    pub fn new(config: &ClientConfig) -> ChatResult<Self> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: config.endpoint("/upload"),
            auth: config.basic_auth.clone(),
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &UploadFile) -> UploadOutcome {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let res = match request.send().await {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!(target: "foundry_chat::uploads", "Upload of {} failed to send: {}", file.filename, e);
                return UploadOutcome::Transport;
            }
        };
        let status = res.status();
        let body = match res.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(target: "foundry_chat::uploads", "Upload of {} lost its response body: {}", file.filename, e);
                return UploadOutcome::Transport;
            }
        };

        // Status code picks the branch; an unreadable body on either branch counts as a network failure.
        if status.is_success() {
            match serde_json::from_str::<AcceptedBody>(&body) {
                Ok(parsed) => UploadOutcome::Accepted {
                    message: parsed.message,
                    chunks_count: parsed.chunks_count,
                },
                Err(e) => {
                    tracing::warn!(target: "foundry_chat::uploads", "Upload of {} returned {} with unparsable body: {}", file.filename, status, e);
                    UploadOutcome::Transport
                }
            }
        } else {
            match serde_json::from_str::<RejectedBody>(&body) {
                Ok(parsed) => UploadOutcome::Rejected {
                    error: parsed
                        .error
                        .unwrap_or_else(|| format!("Upload failed with status {}", status.as_u16())),
                },
                Err(e) => {
                    tracing::warn!(target: "foundry_chat::uploads", "Upload of {} returned {} with unparsable body: {}", file.filename, status, e);
                    UploadOutcome::Transport
                }
            }
        }
    }
}

/// Runs upload batches and keeps the per-attempt status list.
pub struct UploadTracker {
    uploader: Arc<dyn Uploader>,
    observer: Option<Arc<dyn UploadObserver>>,
    concurrency: usize,
    records: watch::Sender<Arc<Vec<UploadRecord>>>,
}

impl UploadTracker {
    pub fn new(uploader: Arc<dyn Uploader>) -> Self {
        let (records, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            uploader,
            observer: None,
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            records,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn UploadObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Max uploads in flight per batch. `1` issues each request only after the previous one resolved.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Current status list.
    pub fn records(&self) -> Arc<Vec<UploadRecord>> {
        self.records.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<UploadRecord>>> {
        self.records.subscribe()
    }

    /// Upload every file, at most `concurrency` at a time, in submission order.
    ///
    /// Returns the batch's terminal records in the same order as `files`.
    pub async fn upload_batch(&self, files: Vec<UploadFile>) -> Vec<UploadRecord> {
        if files.is_empty() {
            return Vec::new();
        }
        let pending: Vec<UploadRecord> = files
            .iter()
            .map(|f| UploadRecord::uploading(&f.filename))
            .collect();
        self.publish(|list| list.extend(pending.iter().cloned()));
        tracing::info!(
            target: "foundry_chat::uploads",
            "Uploading {} file(s), concurrency {}.",
            files.len(),
            self.concurrency
        );

        // Semaphore waiters are served FIFO, and join_all polls in order, so permits go out in submission order.
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tasks = files.into_iter().zip(pending).map(|(file, record)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                // never closed
                let _permit = semaphore.acquire().await.ok();
                tracing::debug!(target: "foundry_chat::uploads", "Upload started: {} ({} bytes)", file.filename, file.bytes.len());
                let outcome = self.uploader.upload(&file).await;
                self.finish(&record, &outcome)
            }
        });
        join_all(tasks).await
    }

    fn finish(&self, record: &UploadRecord, outcome: &UploadOutcome) -> UploadRecord {
        let resolved = record.resolved(outcome);
        self.publish(|list| {
            if let Some(slot) = list.iter_mut().find(|r| r.id == resolved.id) {
                *slot = resolved.clone();
            }
        });
        match resolved.status {
            UploadStatus::Success => {
                tracing::info!(
                    target: "foundry_chat::uploads",
                    "Uploaded {} ({} chunks).",
                    resolved.filename,
                    resolved.chunks_count.unwrap_or(0)
                );
                if let Some(observer) = &self.observer {
                    observer.on_upload_succeeded(&resolved);
                }
            }
            _ => tracing::warn!(
                target: "foundry_chat::uploads",
                "Upload of {} failed: {}",
                resolved.filename,
                resolved.message.as_deref().unwrap_or("")
            ),
        }
        resolved
    }

    fn publish(&self, apply: impl FnOnce(&mut Vec<UploadRecord>)) {
        self.records.send_modify(|current| {
            let mut next = current.as_ref().clone();
            apply(&mut next);
            *current = Arc::new(next);
        });
    }
}
