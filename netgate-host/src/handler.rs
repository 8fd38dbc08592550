//! Host-side HTTP handler slot
//!
//! The host decides how a request is actually carried out. Embedders plug in
//! their own client; the crate only ships a handler that refuses.

use netgate_api::{HttpRequest, TransportError, TransportReply};
use std::time::Duration;

/// Per-request information given to the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Plugin the request came from
    pub plugin_id: String,

    /// Deadline the handler must respect
    pub timeout: Duration,
}

/// Performs requests on behalf of plugins
///
/// Called only after the host has confirmed the `"network"` capability.
/// Must return within `ctx.timeout`.
pub trait HttpHandler: Send + Sync {
    fn handle(&self, ctx: &RequestContext, request: &HttpRequest) -> TransportReply;
}

impl<F> HttpHandler for F
where
    F: Fn(&RequestContext, &HttpRequest) -> TransportReply + Send + Sync,
{
    fn handle(&self, ctx: &RequestContext, request: &HttpRequest) -> TransportReply {
        self(ctx, request)
    }
}

/// Handler for hosts without a network client
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHandler;

impl HttpHandler for UnavailableHandler {
    fn handle(&self, ctx: &RequestContext, request: &HttpRequest) -> TransportReply {
        tracing::debug!(
            plugin = %ctx.plugin_id,
            method = %request.method,
            url = %request.url,
            "no http handler configured"
        );
        Err(TransportError::unavailable("host has no http handler"))
    }
}
