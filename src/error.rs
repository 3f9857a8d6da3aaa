//! Error taxonomy and caller-side retry helpers
//!
//! Every fallible operation in the crate returns [`ChatResult`]. Errors fall
//! into three categories: validation failures caught before any store access,
//! transport failures from the store or the network, and references to
//! conversations that do not exist. Nothing here retries on its own; callers
//! opt in through [`with_retry`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::identity::ConversationKey;

pub type ChatResult<T> = Result<T, ChatError>;

/// Input rejected before any network or store operation.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("message body is empty")]
    EmptyBody,

    #[error("no authenticated sender")]
    MissingSender,

    #[error("cannot start a conversation with yourself")]
    SelfConversation,

    #[error("counterpart identifier is empty")]
    EmptyCounterpart,

    #[error("malformed counterpart identifier: {0}")]
    MalformedCounterpart(String),

    #[error("conversation key is empty")]
    EmptyKey,

    #[error("participant identifier is empty")]
    EmptyParticipant,
}

#[derive(Debug, Error, Clone)]
pub enum ChatError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("conversation not found: {0}")]
    NotFound(ConversationKey),
}

/// Categorized error types for better handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad input (not retryable)
    Validation,

    /// Store or network unavailable (retryable)
    Transport,

    /// Missing conversation (non-fatal)
    NotFound,
}

impl ErrorCategory {
    /// Check if this error category is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transport)
    }
}

impl ChatError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ChatError::Transport(err.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ChatError::Validation(_) => ErrorCategory::Validation,
            ChatError::Transport(_) => ErrorCategory::Transport,
            ChatError::NotFound(_) => ErrorCategory::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// HTTP status used by the server surface.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(ValidationError::MissingSender) => 401,
            ChatError::Validation(_) => 400,
            ChatError::NotFound(_) => 404,
            ChatError::Transport(_) => 503,
        }
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Transport(format!("store: {e}"))
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChatError::Transport(format!("failed to join store task: {e}"))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Transport(format!("http: {e}"))
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create an aggressive retry policy
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            backoff_multiplier: 1.5,
            max_delay: Duration::from_secs(3),
        }
    }
}

/// Re-run `operation` while it fails with a retryable error.
///
/// Only use this for operations that are safe to re-issue. A blind retry of
/// an append after an ambiguous failure can store the message twice.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> ChatResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChatResult<T>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    ?delay,
                    "operation failed, retrying"
                );

                sleep(delay).await;

                // Exponential backoff
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * policy.backoff_multiplier)
                        .min(policy.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}
