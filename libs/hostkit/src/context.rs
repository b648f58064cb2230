//! Request-scoped context injected by the inbound middleware pipeline.

use http::Extensions;

use crate::runtime::ServiceHost;

/// Value installed by the context-injection middleware: the host's root
/// logging span, scoped to one request.
#[derive(Clone)]
struct RequestScope {
    span: tracing::Span,
}

/// Context carried alongside every inbound call.
///
/// Handlers invoked through the pipeline can always retrieve a logger span;
/// when no host-derived scope was installed a default one is created lazily
/// and cached for the remainder of the request.
#[derive(Default)]
pub struct RequestContext {
    extensions: Extensions,
}

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        RequestContext::default()
    }

    /// Install the host-derived request scope. Set once per request by the
    /// context-injection middleware.
    #[must_use]
    pub fn with_host(mut self, host: &ServiceHost) -> Self {
        self.extensions.insert(RequestScope {
            span: host.span().clone(),
        });
        self
    }

    /// The request's logger span.
    ///
    /// Falls back to a lazily installed default span when no host scope is
    /// present; the fallback is cached so every later lookup within the same
    /// request observes the same span.
    pub fn logger(&mut self) -> tracing::Span {
        if let Some(scope) = self.extensions.get::<RequestScope>() {
            return scope.span.clone();
        }
        let scope = RequestScope {
            span: tracing::info_span!("request"),
        };
        let span = scope.span.clone();
        self.extensions.insert(scope);
        span
    }

    /// Typed extension storage for request-scoped values.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}
