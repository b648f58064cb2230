//! Inbound RPC middleware pipeline.
//!
//! Handlers are wrapped by nesting: the context-injection layer is
//! outermost so every inner layer (authorization included) observes an
//! installed request scope, authorization wraps the application handler and
//! short-circuits before it on a rejected credential.

mod handler;
mod middleware;

pub use handler::{
    wrap_oneway, wrap_unary, OnewayHandlerFunc, OnewayInbound, Request, RequestMeta, Response,
    UnaryHandlerFunc, UnaryInbound, AUTH_TICKET_HEADER,
};
pub use middleware::{inbound_pipeline, AuthInbound, ContextInbound};

use crate::auth::AuthError;

/// Transport-level error surfaced to the caller of an inbound call.
#[derive(thiserror::Error, Debug)]
pub enum RpcError {
    /// The caller's credential was rejected.
    #[error(transparent)]
    Unauthorized(AuthError),

    /// Credential validation itself failed; not a rejection.
    #[error(transparent)]
    AuthInternal(AuthError),

    #[error("{0}")]
    Handler(anyhow::Error),
}

impl From<AuthError> for RpcError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthorized => RpcError::Unauthorized(error),
            AuthError::Internal(_) => RpcError::AuthInternal(error),
        }
    }
}
