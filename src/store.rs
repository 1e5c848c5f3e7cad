use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::blob_store::{BlobError, BlobStore, GitHubContents};
use crate::config::{ConfigError, StoreConfig};
use crate::message_database::{decode_messages, encode_messages, Message, Messages};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("content store error: {0}")]
    Upstream(#[from] BlobError),
    #[error("stored messages are not valid UTF-8")]
    NotUtf8(#[from] std::string::FromUtf8Error),
    #[error("stored messages are not a JSON array of messages: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("could not encode messages: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("message list lock poisoned")]
    Poisoned,
}

/// Somewhere to keep the chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends `message` and returns the whole collection after the append.
    async fn append(&self, message: Message) -> Result<Messages, StoreError>;

    async fn list(&self) -> Result<Messages, StoreError>;
}

/// Builds the backend named by the configuration.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn MessageStore>, ConfigError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Github(github) => {
            let token = github.resolve_token()?;
            let blobs = GitHubContents::new(
                &github.api_url,
                &github.owner,
                &github.repo,
                &github.branch,
                &token,
            );
            info!(
                owner = %github.owner,
                repo = %github.repo,
                path = %github.path,
                branch = %github.branch,
                "using GitHub message store"
            );
            Ok(Arc::new(
                RemoteStore::new(Arc::new(blobs), &github.path)
                    .with_commit_message(&github.commit_message)
                    .with_conflict_retries(github.max_conflict_retries),
            ))
        }
    }
}

/// Messages held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<Messages>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, message: Message) -> Result<Messages, StoreError> {
        let mut messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        messages.push(message);
        Ok(messages.clone())
    }

    async fn list(&self) -> Result<Messages, StoreError> {
        let messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(messages.clone())
    }
}

/// Messages kept as one JSON array in a blob store.
///
/// Appending is read-modify-write guarded by the blob's revision: a write
/// that loses the race against another writer is rejected by the blob store.
/// By default the message is then dropped and the caller sees the error;
/// `with_conflict_retries` allows re-reading and trying again a bounded
/// number of times.
pub struct RemoteStore {
    blobs: Arc<dyn BlobStore>,
    path: String,
    commit_message: String,
    max_conflict_retries: u32,
}

impl RemoteStore {
    pub fn new(blobs: Arc<dyn BlobStore>, path: &str) -> Self {
        RemoteStore {
            blobs,
            path: path.to_string(),
            commit_message: "Update chat log".into(),
            max_conflict_retries: 0,
        }
    }

    pub fn with_commit_message(mut self, commit_message: &str) -> Self {
        self.commit_message = commit_message.to_string();
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    // The collection and the revision it was read at. No revision means the
    // blob does not exist yet.
    async fn fetch(&self) -> Result<(Messages, Option<String>), StoreError> {
        match self.blobs.get(&self.path).await? {
            Some(blob) => {
                let content = String::from_utf8(blob.content)?;
                let messages = decode_messages(&content).map_err(StoreError::Decode)?;
                Ok((messages, Some(blob.revision)))
            }
            None => {
                debug!(path = %self.path, "no stored messages yet");
                Ok((Messages::new(), None))
            }
        }
    }
}

#[async_trait]
impl MessageStore for RemoteStore {
    async fn append(&self, message: Message) -> Result<Messages, StoreError> {
        let mut retries = 0;

        loop {
            let (mut messages, revision) = self.fetch().await?;
            messages.push(message.clone());
            let content = encode_messages(&messages).map_err(StoreError::Encode)?;

            let written = self
                .blobs
                .put(
                    &self.path,
                    content.as_bytes(),
                    revision.as_deref(),
                    &self.commit_message,
                )
                .await;

            match written {
                Ok(()) => return Ok(messages),
                Err(BlobError::Conflict { .. }) if retries < self.max_conflict_retries => {
                    retries += 1;
                    warn!(
                        path = %self.path,
                        retries,
                        "blob changed while appending, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn list(&self) -> Result<Messages, StoreError> {
        let (messages, _) = self.fetch().await?;
        Ok(messages)
    }
}
