use std::sync::Arc;

use async_trait::async_trait;

use crate::auth;
use crate::context::RequestContext;
use crate::rpc::handler::{OnewayInbound, Request, Response, UnaryInbound};
use crate::rpc::RpcError;
use crate::runtime::ServiceHost;

/// Context-injection middleware: installs the host-derived request scope
/// before delegating, so every handler down the chain observes a context
/// with a retrievable logger.
pub struct ContextInbound<H> {
    host: Arc<ServiceHost>,
    next: H,
}

impl<H> ContextInbound<H> {
    pub fn new(host: Arc<ServiceHost>, next: H) -> Self {
        ContextInbound { host, next }
    }
}

#[async_trait]
impl<H: UnaryInbound> UnaryInbound for ContextInbound<H> {
    async fn handle(&self, ctx: RequestContext, req: Request) -> Result<Response, RpcError> {
        self.next.handle(ctx.with_host(&self.host), req).await
    }
}

#[async_trait]
impl<H: OnewayInbound> OnewayInbound for ContextInbound<H> {
    async fn handle_oneway(&self, ctx: RequestContext, req: Request) -> Result<(), RpcError> {
        self.next
            .handle_oneway(ctx.with_host(&self.host), req)
            .await
    }
}

/// Authorization middleware: validates the caller's credential against the
/// process-wide client before delegating. With no client configured, calls
/// pass through unauthenticated. A rejected credential short-circuits the
/// chain; the wrapped handler is never invoked.
pub struct AuthInbound<H> {
    next: H,
}

impl<H> AuthInbound<H> {
    pub fn new(next: H) -> Self {
        AuthInbound { next }
    }
}

#[async_trait]
impl<H: UnaryInbound> UnaryInbound for AuthInbound<H> {
    async fn handle(&self, ctx: RequestContext, req: Request) -> Result<Response, RpcError> {
        if let Some(client) = auth::client() {
            let credential = req.meta.credential().unwrap_or_default();
            client.authorize(&ctx, &credential).await?;
        }
        self.next.handle(ctx, req).await
    }
}

#[async_trait]
impl<H: OnewayInbound> OnewayInbound for AuthInbound<H> {
    async fn handle_oneway(&self, ctx: RequestContext, req: Request) -> Result<(), RpcError> {
        if let Some(client) = auth::client() {
            let credential = req.meta.credential().unwrap_or_default();
            client.authorize(&ctx, &credential).await?;
        }
        self.next.handle_oneway(ctx, req).await
    }
}

/// Assemble the standard inbound pipeline around an application handler:
/// context injection outermost, then authorization, then the handler.
pub fn inbound_pipeline<H>(host: Arc<ServiceHost>, handler: H) -> ContextInbound<AuthInbound<H>> {
    ContextInbound::new(host, AuthInbound::new(handler))
}
