//! Participant identifiers and canonical conversation keys
//!
//! A two-party conversation is addressed by a key derived from the unordered
//! pair of its participants: the lexicographically lesser id, `_`, then the
//! other. `conversation_key(a, b) == conversation_key(b, a)` for any input.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Joins the two participant ids inside a key.
pub const KEY_SEPARATOR: char = '_';

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9a-z._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,64}$")
        .expect("email pattern compiles")
});

/// Opaque principal identifier issued by the identity provider.
///
/// Never empty. Surrounding whitespace is trimmed on construction; nothing
/// else about the format is checked.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyParticipant);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison, used to detect self-conversations.
    pub fn same_principal(&self, other: &ParticipantId) -> bool {
        self.0.to_lowercase() == other.0.to_lowercase()
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical, order-independent key of a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ConversationKey(String);

impl ConversationKey {
    /// Key for two validated participants. Self-pairs are not rejected here.
    pub fn for_pair(a: &ParticipantId, b: &ParticipantId) -> Self {
        conversation_key(a.as_str(), b.as_str())
    }

    /// Accept a key produced elsewhere. Keys are opaque once derived.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::EmptyKey);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the canonical key for an unordered pair of identifiers.
///
/// Total over all strings: equal inputs give `a_a`, empty inputs give a
/// degenerate key such as `_b`. Callers validate before reaching the store.
pub fn conversation_key(a: &str, b: &str) -> ConversationKey {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    ConversationKey(format!("{first}{KEY_SEPARATOR}{second}"))
}

/// Validate the identifier typed in when starting a new conversation.
pub fn validate_counterpart(
    me: &ParticipantId,
    raw: &str,
) -> Result<ParticipantId, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyCounterpart);
    }
    if !EMAIL_PATTERN.is_match(trimmed) {
        return Err(ValidationError::MalformedCounterpart(trimmed.to_owned()));
    }

    let counterpart = ParticipantId::new(trimmed)?;
    if counterpart.same_principal(me) {
        return Err(ValidationError::SelfConversation);
    }
    Ok(counterpart)
}
