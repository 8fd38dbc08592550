//! Capability-gated HTTP operations
//!
//! Every operation runs the same sequence:
//!
//! ```text
//! START ──► GATE_CHECK ──┬──► DENIED                         (sentinel)
//!                        └──► EXECUTING ──┬──► SUCCESS       (value)
//!                                         └──► FAILURE       (sentinel)
//! ```
//!
//! The gate is consulted on every call, before the transport is touched.
//! Failures never escape as errors or panics: body-returning operations
//! answer `None`, status-returning operations answer `-1`.

use crate::error::NetError;
use crate::gate::CapabilityGate;
use crate::oracle::{CapabilityOracle, HostOracle};
use crate::transport::{AsyncTransportExecutor, DefaultTransport, TransportExecutor};
use netgate_api::{
    HttpRequest, HttpResponse, TransportError, TransportReply, NETWORK_CAPABILITY,
    STATUS_NOT_ATTEMPTED, STATUS_OK,
};
use std::future::{poll_fn, Future};
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::task::Poll;

/// Network client: a capability gate in front of a transport
#[derive(Debug, Clone, Default)]
pub struct Network<O, T> {
    gate: CapabilityGate<O>,
    transport: T,
}

impl<O: CapabilityOracle, T> Network<O, T> {
    pub fn new(oracle: O, transport: T) -> Self {
        Self {
            gate: CapabilityGate::new(oracle),
            transport,
        }
    }

    pub fn gate(&self) -> &CapabilityGate<O> {
        &self.gate
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether `"network"` is granted right now
    pub fn has_network_capability(&self) -> bool {
        self.gate.has_network_capability()
    }

    fn admit(&self, request: &HttpRequest) -> Result<(), NetError> {
        if !self.gate.has_network_capability() {
            return Err(NetError::PermissionDenied(NETWORK_CAPABILITY));
        }
        request.validate()?;
        Ok(())
    }
}

impl<O: CapabilityOracle, T: TransportExecutor> Network<O, T> {
    fn perform(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        self.admit(&request)?;
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");

        match panic::catch_unwind(AssertUnwindSafe(|| self.transport.execute(&request))) {
            Ok(reply) => settle(reply),
            Err(_) => Err(panicked()),
        }
    }

    /// GET `url`; the body of a 200 response, otherwise `None`
    pub fn get(&self, url: &str) -> Option<String> {
        ok_body("GET", url, self.perform(HttpRequest::get(url)))
    }

    /// POST a JSON body; the response status, or `-1`
    pub fn post(&self, url: &str, body: &str) -> i32 {
        status("POST", url, self.perform(HttpRequest::post_json(url, body)))
    }

    /// POST a JSON body; the response body, or `None`
    pub fn post_with_response(&self, url: &str, body: &str) -> Option<String> {
        any_body("POST", url, self.perform(HttpRequest::post_json(url, body)))
    }

    /// PUT a JSON body; the response status, or `-1`
    pub fn put(&self, url: &str, body: &str) -> i32 {
        status("PUT", url, self.perform(HttpRequest::put_json(url, body)))
    }

    /// DELETE `url`; the response status, or `-1`
    pub fn delete(&self, url: &str) -> i32 {
        status("DELETE", url, self.perform(HttpRequest::delete(url)))
    }

    /// Request with any method and optional body / content type
    pub fn request(
        &self,
        url: &str,
        method: &str,
        body: Option<&str>,
        content_type: Option<&str>,
    ) -> Option<HttpResponse> {
        let request = build_request(url, method, body, content_type);
        response("REQUEST", url, self.perform(request))
    }
}

/// Suspending variants
///
/// The gate check runs synchronously before the first await; awaiting the
/// transport is the only suspension point.
impl<O: CapabilityOracle, T: AsyncTransportExecutor> Network<O, T> {
    async fn perform_async(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        self.admit(&request)?;
        tracing::debug!(method = %request.method, url = %request.url, "dispatching request");

        let mut pending = pin!(self.transport.dispatch(&request));
        poll_fn(|cx| {
            match panic::catch_unwind(AssertUnwindSafe(|| pending.as_mut().poll(cx))) {
                Ok(Poll::Ready(reply)) => Poll::Ready(settle(reply)),
                Ok(Poll::Pending) => Poll::Pending,
                Err(_) => Poll::Ready(Err(panicked())),
            }
        })
        .await
    }

    pub async fn get_async(&self, url: &str) -> Option<String> {
        ok_body("GET", url, self.perform_async(HttpRequest::get(url)).await)
    }

    pub async fn post_async(&self, url: &str, body: &str) -> i32 {
        let outcome = self.perform_async(HttpRequest::post_json(url, body)).await;
        status("POST", url, outcome)
    }

    pub async fn post_with_response_async(&self, url: &str, body: &str) -> Option<String> {
        let outcome = self.perform_async(HttpRequest::post_json(url, body)).await;
        any_body("POST", url, outcome)
    }

    pub async fn put_async(&self, url: &str, body: &str) -> i32 {
        let outcome = self.perform_async(HttpRequest::put_json(url, body)).await;
        status("PUT", url, outcome)
    }

    pub async fn delete_async(&self, url: &str) -> i32 {
        status("DELETE", url, self.perform_async(HttpRequest::delete(url)).await)
    }

    pub async fn request_async(
        &self,
        url: &str,
        method: &str,
        body: Option<&str>,
        content_type: Option<&str>,
    ) -> Option<HttpResponse> {
        let request = build_request(url, method, body, content_type);
        response("REQUEST", url, self.perform_async(request).await)
    }
}

fn build_request(
    url: &str,
    method: &str,
    body: Option<&str>,
    content_type: Option<&str>,
) -> HttpRequest {
    let mut request = HttpRequest::new(method, url);
    request.body = body.map(str::to_owned);
    request.content_type = content_type.map(str::to_owned);
    request
}

fn settle(reply: TransportReply) -> Result<HttpResponse, NetError> {
    let response = reply?;
    if !response.has_valid_status() {
        return Err(NetError::TransportFailure(format!(
            "unexpected status {}",
            response.status
        )));
    }
    Ok(response)
}

fn panicked() -> NetError {
    NetError::from(TransportError::Connection(
        "transport executor panicked".into(),
    ))
}

fn report(op: &'static str, url: &str, error: &NetError) {
    match error {
        NetError::PermissionDenied(_) | NetError::TransportUnavailable(_) => {
            tracing::debug!(op, url, kind = error.kind(), error = %error, "request not attempted");
        }
        NetError::TransportFailure(_) | NetError::Encoding(_) | NetError::Request(_) => {
            tracing::warn!(op, url, kind = error.kind(), error = %error, "request failed");
        }
    }
}

fn ok_body(op: &'static str, url: &str, outcome: Result<HttpResponse, NetError>) -> Option<String> {
    match outcome {
        Ok(response) if response.status == STATUS_OK => Some(response.body),
        Ok(response) => {
            tracing::debug!(op, url, status = response.status, "non-200 response discarded");
            None
        }
        Err(e) => {
            report(op, url, &e);
            None
        }
    }
}

fn any_body(op: &'static str, url: &str, outcome: Result<HttpResponse, NetError>) -> Option<String> {
    response(op, url, outcome).map(|r| r.body)
}

fn status(op: &'static str, url: &str, outcome: Result<HttpResponse, NetError>) -> i32 {
    response(op, url, outcome)
        .map(|r| r.status)
        .unwrap_or(STATUS_NOT_ATTEMPTED)
}

fn response(
    op: &'static str,
    url: &str,
    outcome: Result<HttpResponse, NetError>,
) -> Option<HttpResponse> {
    outcome.map_err(|e| report(op, url, &e)).ok()
}

/// Network for this deployment: the host oracle and the build's transport
pub fn default_network() -> Network<HostOracle, DefaultTransport> {
    Network::new(HostOracle, DefaultTransport::default())
}

/// Whether the host currently grants `"network"` to this plugin
pub fn has_network_capability() -> bool {
    CapabilityGate::new(HostOracle).has_network_capability()
}

/// GET `url`; the body of a 200 response, otherwise `None`
pub fn http_get(url: &str) -> Option<String> {
    default_network().get(url)
}

/// POST a JSON body; the response status, or `-1`
pub fn http_post(url: &str, body: &str) -> i32 {
    default_network().post(url, body)
}

/// POST a JSON body; the response body, or `None`
pub fn http_post_with_response(url: &str, body: &str) -> Option<String> {
    default_network().post_with_response(url, body)
}

/// PUT a JSON body; the response status, or `-1`
pub fn http_put(url: &str, body: &str) -> i32 {
    default_network().put(url, body)
}

/// DELETE `url`; the response status, or `-1`
pub fn http_delete(url: &str) -> i32 {
    default_network().delete(url)
}

/// Request with any method; `None` on denial or failure
pub fn http_request(
    url: &str,
    method: &str,
    body: Option<&str>,
    content_type: Option<&str>,
) -> Option<HttpResponse> {
    default_network().request(url, method, body, content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FixedOracle, SharedOracle};
    use netgate_api::{TransportError, JSON_CONTENT_TYPE};
    use std::cell::RefCell;

    /// Transport that records requests and answers from a script
    struct ScriptedTransport {
        reply: TransportReply,
        seen: RefCell<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn answering(status: i32, body: &str) -> Self {
            Self::replying(Ok(HttpResponse::new(status, body)))
        }

        fn replying(reply: TransportReply) -> Self {
            Self {
                reply,
                seen: RefCell::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.borrow().len()
        }

        fn last(&self) -> HttpRequest {
            self.seen.borrow().last().cloned().expect("no request seen")
        }
    }

    impl TransportExecutor for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> TransportReply {
            self.seen.borrow_mut().push(request.clone());
            self.reply.clone()
        }
    }

    struct PanickingTransport;

    impl TransportExecutor for PanickingTransport {
        fn execute(&self, _request: &HttpRequest) -> TransportReply {
            panic!("socket exploded")
        }
    }

    /// Transport that suspends once before answering
    struct YieldingTransport {
        status: i32,
    }

    impl AsyncTransportExecutor for YieldingTransport {
        async fn dispatch(&self, request: &HttpRequest) -> TransportReply {
            tokio::task::yield_now().await;
            Ok(HttpResponse::new(self.status, request.url.clone()))
        }
    }

    fn granted(transport: ScriptedTransport) -> Network<FixedOracle, ScriptedTransport> {
        Network::new(FixedOracle::granted(), transport)
    }

    const URL: &str = "https://example.com/api";

    #[test]
    fn test_denied_never_reaches_transport() {
        let net = Network::new(FixedOracle::denied(), ScriptedTransport::answering(200, "ok"));

        assert_eq!(net.get(URL), None);
        assert_eq!(net.post(URL, "{}"), STATUS_NOT_ATTEMPTED);
        assert_eq!(net.post_with_response(URL, "{}"), None);
        assert_eq!(net.put(URL, "{}"), STATUS_NOT_ATTEMPTED);
        assert_eq!(net.delete(URL), STATUS_NOT_ATTEMPTED);
        assert_eq!(net.request(URL, "PATCH", Some("{}"), None), None);

        assert_eq!(net.transport().calls(), 0);
    }

    #[test]
    fn test_get_returns_body_on_200() {
        let net = granted(ScriptedTransport::answering(200, "ok"));
        assert_eq!(net.get(URL).as_deref(), Some("ok"));

        let sent = net.transport().last();
        assert_eq!(sent.method, "GET");
        assert_eq!(sent.url, URL);
        assert_eq!(sent.body, None);
        assert_eq!(sent.content_type, None);
    }

    #[test]
    fn test_get_discards_non_200() {
        for status in [201, 204, 301, 404, 500] {
            let net = granted(ScriptedTransport::answering(status, "not found"));
            assert_eq!(net.get(URL), None, "status {status}");
            assert_eq!(net.transport().calls(), 1);
        }
    }

    #[test]
    fn test_status_passthrough() {
        for code in [100, 200, 404, 500] {
            let net = granted(ScriptedTransport::answering(code, ""));
            assert_eq!(net.post(URL, "{}"), code);
            assert_eq!(net.put(URL, "{}"), code);
            assert_eq!(net.delete(URL), code);
            assert_ne!(net.post(URL, "{}"), STATUS_NOT_ATTEMPTED);
        }
    }

    #[test]
    fn test_post_sends_json_body() {
        let net = granted(ScriptedTransport::answering(201, "created"));
        assert_eq!(net.post(URL, r#"{"a":1}"#), 201);

        let sent = net.transport().last();
        assert_eq!(sent.method, "POST");
        assert_eq!(sent.body.as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(sent.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
    }

    #[test]
    fn test_post_with_response_passes_body_through() {
        let net = granted(ScriptedTransport::answering(500, "boom"));
        assert_eq!(net.post_with_response(URL, "{}").as_deref(), Some("boom"));
    }

    #[test]
    fn test_request_keeps_absent_and_empty_apart() {
        let net = granted(ScriptedTransport::answering(200, ""));

        let response = net.request(URL, "OPTIONS", None, None).unwrap();
        assert_eq!(response, HttpResponse::new(200, ""));
        let sent = net.transport().last();
        assert_eq!(sent.method, "OPTIONS");
        assert_eq!(sent.body, None);
        assert_eq!(sent.content_type, None);

        net.request(URL, "POST", Some(""), Some("")).unwrap();
        let sent = net.transport().last();
        assert_eq!(sent.body.as_deref(), Some(""));
        assert_eq!(sent.content_type.as_deref(), Some(""));
    }

    #[test]
    fn test_transport_failure_becomes_sentinel() {
        let failures = [
            TransportError::Timeout(30_000),
            TransportError::Connection("refused".into()),
            TransportError::malformed("garbage"),
            TransportError::unavailable("stub"),
            TransportError::Denied,
        ];
        for failure in failures {
            let net = granted(ScriptedTransport::replying(Err(failure)));
            assert_eq!(net.request(URL, "GET", None, None), None);
            assert_eq!(net.get(URL), None);
            assert_eq!(net.post(URL, "{}"), STATUS_NOT_ATTEMPTED);
        }
    }

    #[test]
    fn test_invalid_status_is_failure() {
        for status in [STATUS_NOT_ATTEMPTED, 0, 42, 600, 1_000] {
            let net = granted(ScriptedTransport::answering(status, "odd"));
            assert_eq!(net.post(URL, "{}"), STATUS_NOT_ATTEMPTED);
            assert_eq!(net.request(URL, "GET", None, None), None);
            assert_eq!(net.post_with_response(URL, "{}"), None);
        }
    }

    #[test]
    fn test_malformed_request_skips_transport() {
        let net = granted(ScriptedTransport::answering(200, "ok"));
        assert_eq!(net.get(""), None);
        assert_eq!(net.request(URL, "", None, None), None);
        assert_eq!(net.transport().calls(), 0);
    }

    #[test]
    fn test_panicking_transport_is_contained() {
        let net = Network::new(FixedOracle::granted(), PanickingTransport);
        assert_eq!(net.get(URL), None);
        assert_eq!(net.delete(URL), STATUS_NOT_ATTEMPTED);
        assert_eq!(net.request(URL, "GET", None, None), None);
    }

    #[test]
    fn test_gate_checked_on_every_call() {
        let oracle = SharedOracle::new();
        let net = Network::new(oracle.clone(), ScriptedTransport::answering(200, "ok"));

        oracle.set_granted(true);
        assert_eq!(net.get(URL).as_deref(), Some("ok"));
        oracle.set_granted(false);
        assert_eq!(net.get(URL), None);

        assert_eq!(oracle.calls(), 2);
        assert_eq!(net.transport().calls(), 1);
    }

    #[test]
    fn test_default_network_fails_closed_off_host() {
        assert!(!has_network_capability());
        assert_eq!(http_get(URL), None);
        assert_eq!(http_post(URL, "{}"), STATUS_NOT_ATTEMPTED);
        assert_eq!(http_post_with_response(URL, "{}"), None);
        assert_eq!(http_put(URL, "{}"), STATUS_NOT_ATTEMPTED);
        assert_eq!(http_delete(URL), STATUS_NOT_ATTEMPTED);
        assert_eq!(http_request(URL, "GET", None, None), None);
    }

    #[tokio::test]
    async fn test_async_operations_suspend_and_resume() {
        let net = Network::new(FixedOracle::granted(), YieldingTransport { status: 200 });
        assert_eq!(net.get_async(URL).await.as_deref(), Some(URL));
        assert_eq!(net.post_async(URL, "{}").await, 200);
        assert_eq!(net.put_async(URL, "{}").await, 200);
        assert_eq!(net.delete_async(URL).await, 200);
        assert_eq!(
            net.post_with_response_async(URL, "{}").await.as_deref(),
            Some(URL)
        );
        assert_eq!(
            net.request_async(URL, "HEAD", None, None).await,
            Some(HttpResponse::new(200, URL))
        );
    }

    #[tokio::test]
    async fn test_async_get_applies_200_policy() {
        let net = Network::new(FixedOracle::granted(), YieldingTransport { status: 404 });
        assert_eq!(net.get_async(URL).await, None);
        assert_eq!(net.delete_async(URL).await, 404);
    }

    #[tokio::test]
    async fn test_async_denied_never_dispatches() {
        let net = Network::new(FixedOracle::denied(), ScriptedTransport::answering(200, "ok"));
        assert_eq!(net.get_async(URL).await, None);
        assert_eq!(net.post_async(URL, "{}").await, STATUS_NOT_ATTEMPTED);
        assert_eq!(net.request_async(URL, "GET", None, None).await, None);
        assert_eq!(net.transport().calls(), 0);
    }
}
