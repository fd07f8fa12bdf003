//! Owner identity.
//!
//! The registry and coordinator only ever ask "who is signed in right now";
//! [`AuthProvider`] is that question. [`SessionAuth`] is the local,
//! anonymous-login implementation used by the server.

use std::sync::RwLock;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::OwnerId;

static OWNER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("valid owner id regex"));

/// Check that an owner id is safe to use as a storage key.
#[must_use]
pub fn is_valid_owner_id(id: &str) -> bool {
    OWNER_ID_RE.is_match(id)
}

/// Parse untrusted input into an [`OwnerId`].
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the id contains anything other than
/// ASCII letters, digits, `-` or `_`, or is longer than 128 characters.
pub fn validate_owner_id(id: &str) -> Result<OwnerId> {
    if is_valid_owner_id(id) {
        Ok(OwnerId::new(id))
    } else {
        Err(Error::InvalidInput(format!("invalid owner id: '{id}'")))
    }
}

/// Source of the currently authenticated owner.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The signed-in owner, if any.
    async fn current_owner(&self) -> Option<OwnerId>;
}

/// In-process session with anonymous sign-in.
#[derive(Debug, Default)]
pub struct SessionAuth {
    owner: RwLock<Option<OwnerId>>,
}

impl SessionAuth {
    /// Create a signed-out session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session already signed in as `owner`.
    #[must_use]
    pub fn signed_in(owner: OwnerId) -> Self {
        Self {
            owner: RwLock::new(Some(owner)),
        }
    }

    /// Return the cached owner, or mint a new anonymous one.
    pub fn sign_in_anonymously(&self) -> OwnerId {
        let mut guard = self.owner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(owner) = guard.as_ref() {
            return owner.clone();
        }
        let owner = OwnerId::new(Uuid::new_v4().simple().to_string());
        tracing::info!(owner_id = %owner, "anonymous sign-in");
        *guard = Some(owner.clone());
        owner
    }

    /// Sign in as a specific owner, replacing any current session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed ids.
    pub fn sign_in(&self, owner: &str) -> Result<OwnerId> {
        let owner = validate_owner_id(owner)?;
        *self.owner.write().unwrap_or_else(|e| e.into_inner()) = Some(owner.clone());
        tracing::info!(owner_id = %owner, "signed in");
        Ok(owner)
    }

    /// Clear the session. Signing out twice is harmless.
    pub fn sign_out(&self) {
        if let Some(owner) = self.owner.write().unwrap_or_else(|e| e.into_inner()).take() {
            tracing::info!(owner_id = %owner, "signed out");
        }
    }

    fn snapshot(&self) -> Option<OwnerId> {
        self.owner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuthProvider for SessionAuth {
    async fn current_owner(&self) -> Option<OwnerId> {
        self.snapshot()
    }
}
