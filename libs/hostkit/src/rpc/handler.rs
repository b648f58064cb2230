use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

use crate::auth::Credential;
use crate::context::RequestContext;
use crate::rpc::RpcError;

/// Header carrying the caller's authorization ticket.
pub const AUTH_TICKET_HEADER: &str = "auth-ticket";

/// Transport-level metadata of an inbound call.
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
    pub caller: String,
    pub service: String,
    pub procedure: String,
    pub headers: http::HeaderMap,
}

impl RequestMeta {
    /// Credential from the `auth-ticket` header, if present.
    pub fn credential(&self) -> Option<Credential> {
        self.headers
            .get(AUTH_TICKET_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(Credential::new)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Request {
    pub meta: RequestMeta,
    pub body: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub body: Bytes,
}

/// Transport contract for request/response calls.
#[async_trait]
pub trait UnaryInbound: Send + Sync {
    async fn handle(&self, ctx: RequestContext, req: Request) -> Result<Response, RpcError>;
}

/// Transport contract for fire-and-forget calls.
#[async_trait]
pub trait OnewayInbound: Send + Sync {
    async fn handle_oneway(&self, ctx: RequestContext, req: Request) -> Result<(), RpcError>;
}

/// Adapter satisfying [`UnaryInbound`] for a plain async function. Delegates
/// directly; results propagate unchanged.
pub struct UnaryHandlerFunc<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> UnaryInbound for UnaryHandlerFunc<F>
where
    F: Fn(RequestContext, RequestMeta, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext, req: Request) -> Result<Response, RpcError> {
        (self.f)(ctx, req.meta, req.body)
            .await
            .map_err(RpcError::Handler)
    }
}

/// Adapt an application handler `(ctx, meta, payload) -> Result<Response>`
/// to the transport's unary contract.
pub fn wrap_unary<F, Fut>(f: F) -> UnaryHandlerFunc<F>
where
    F: Fn(RequestContext, RequestMeta, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    UnaryHandlerFunc { f }
}

/// Adapter satisfying [`OnewayInbound`] for a plain async function.
pub struct OnewayHandlerFunc<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> OnewayInbound for OnewayHandlerFunc<F>
where
    F: Fn(RequestContext, RequestMeta, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle_oneway(&self, ctx: RequestContext, req: Request) -> Result<(), RpcError> {
        (self.f)(ctx, req.meta, req.body)
            .await
            .map_err(RpcError::Handler)
    }
}

/// Adapt an application handler `(ctx, meta, payload) -> Result<()>` to the
/// transport's one-way contract.
pub fn wrap_oneway<F, Fut>(f: F) -> OnewayHandlerFunc<F>
where
    F: Fn(RequestContext, RequestMeta, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    OnewayHandlerFunc { f }
}
