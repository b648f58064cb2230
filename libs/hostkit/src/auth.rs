//! Process-wide authorization client.
//!
//! The client is configured once at startup via [`register_client`]; an
//! explicit [`unregister_client`] reset exists for test isolation. When no
//! client is registered, inbound calls pass through unauthenticated — the
//! permissive default for environments that disable auth.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::context::RequestContext;

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("error authorizing the service")]
    Unauthorized,

    #[error("authorization client failure: {0}")]
    Internal(String),
}

/// Capability token validated before a request reaches application code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Credential(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Validates a caller's credential for an inbound request.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// # Errors
    /// [`AuthError::Unauthorized`] when the credential is rejected,
    /// [`AuthError::Internal`] when validation itself failed.
    async fn authorize(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
    ) -> Result<(), AuthError>;
}

static CLIENT: RwLock<Option<Arc<dyn AuthClient>>> = RwLock::new(None);

/// Install the process-wide client. Replaces any previous registration.
pub fn register_client(client: Arc<dyn AuthClient>) {
    *CLIENT.write() = Some(client);
}

/// Test-isolation reset.
pub fn unregister_client() {
    *CLIENT.write() = None;
}

/// The configured client, if any.
pub fn client() -> Option<Arc<dyn AuthClient>> {
    CLIENT.read().clone()
}

/// Serializes tests that touch the process-wide client.
#[cfg(test)]
pub(crate) fn test_lock() -> parking_lot::MutexGuard<'static, ()> {
    static LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
    LOCK.lock()
}
