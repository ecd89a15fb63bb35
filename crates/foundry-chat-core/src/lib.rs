//! foundry-chat-core: client side of the workshop RAG chat app.
//!
//! - [`annotations`]: group citation annotations into per-document references.
//! - [`uploads`]: tracked multipart uploads to `POST /upload` with bounded concurrency.
//! - [`chat`]: `POST /chat` client and server-sent-event decoding.
//! - [`env_file`]: idempotent `.env` upserts and example-file sync.

pub mod annotations;
pub mod chat;
mod config;
pub mod env_file;
mod error;
pub mod uploads;

pub use annotations::{
    group_annotations, render_references, Annotation, ReferenceGroup, NOT_AVAILABLE,
    UNKNOWN_DOCUMENT,
};
pub use chat::{
    ChatClient, ChatMessage, ChatRole, ChatTranscript, Source, SseDecoder, StreamEvent, UsageInfo,
};
pub use config::{
    BasicAuth, ClientConfig, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_UPLOAD_CONCURRENCY,
};
pub use env_file::{read_env_file, sync_env_files, upsert_env_values, UpsertReport};
pub use error::{ChatError, ChatResult};
pub use uploads::{
    HttpUploader, UploadFile, UploadObserver, UploadOutcome, UploadRecord, UploadStatus,
    UploadTracker, Uploader, NETWORK_ERROR_MESSAGE,
};
