//! Explicit session context
//!
//! Holds the principal handed over by the identity provider. A `Session` is
//! passed to every call that needs an authenticated sender; there is no
//! process-wide login flag.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::{ChatResult, ValidationError};
use crate::identity::ParticipantId;

#[derive(Debug, Clone, Default)]
pub struct Session {
    principal: Arc<RwLock<Option<ParticipantId>>>,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(principal: ParticipantId) -> Self {
        Self {
            principal: Arc::new(RwLock::new(Some(principal))),
        }
    }

    /// Called from the identity provider's sign-in callback.
    pub fn sign_in(&self, principal: ParticipantId) {
        info!(principal = %principal, "session signed in");
        *self.principal.write() = Some(principal);
    }

    /// Returns the principal that was signed in, if any.
    pub fn sign_out(&self) -> Option<ParticipantId> {
        let previous = self.principal.write().take();
        if let Some(principal) = &previous {
            info!(principal = %principal, "session signed out");
        }
        previous
    }

    pub fn principal(&self) -> Option<ParticipantId> {
        self.principal.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.principal.read().is_some()
    }

    pub fn require_principal(&self) -> ChatResult<ParticipantId> {
        self.principal()
            .ok_or_else(|| ValidationError::MissingSender.into())
    }
}
