//! Transport executors
//!
//! A transport performs the network call once the gate has passed. The
//! operation contract does not care how: a blocking host import, a future
//! that suspends, or a job handed to a helper outside the sandbox.
//!
//! | Executor | Where the request goes |
//! |----------|------------------------|
//! | [`UnavailableTransport`] | Nowhere; always `Unavailable` |
//! | [`HostTransport`] | Host import `env.sk_http_request` (feature `host-fetch`) |
//! | [`ChannelTransport`] | A cooperating dispatcher task over a channel (async only) |
//!
//! [`DefaultTransport`] picks between the first two at build time.

use netgate_api::{HttpRequest, TransportError, TransportReply};
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

/// Performs a request and reports the response or the failure
///
/// Implementations must return within a bounded time.
pub trait TransportExecutor {
    fn execute(&self, request: &HttpRequest) -> TransportReply;
}

impl<T: TransportExecutor + ?Sized> TransportExecutor for &T {
    fn execute(&self, request: &HttpRequest) -> TransportReply {
        (**self).execute(request)
    }
}

impl<T: TransportExecutor + ?Sized> TransportExecutor for Box<T> {
    fn execute(&self, request: &HttpRequest) -> TransportReply {
        (**self).execute(request)
    }
}

/// Transport whose call may suspend the calling task
///
/// Every [`TransportExecutor`] is one, completing without suspending.
pub trait AsyncTransportExecutor {
    fn dispatch(&self, request: &HttpRequest) -> impl Future<Output = TransportReply>;
}

impl<T: TransportExecutor> AsyncTransportExecutor for T {
    fn dispatch(&self, request: &HttpRequest) -> impl Future<Output = TransportReply> {
        std::future::ready(self.execute(request))
    }
}

/// Stub for deployments without a transport
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTransport;

impl TransportExecutor for UnavailableTransport {
    fn execute(&self, _request: &HttpRequest) -> TransportReply {
        Err(TransportError::unavailable(
            "no transport is configured for this target",
        ))
    }
}

#[cfg(all(target_arch = "wasm32", feature = "host-fetch"))]
mod ffi {
    #[link(wasm_import_module = "env")]
    extern "C" {
        pub fn sk_http_request(req_ptr: *const u8, req_len: usize) -> i64;
    }
}

/// Transport that asks the host to perform the request
///
/// The request is sent as MessagePack; the host writes a
/// [`TransportReply`] into guest memory through `plugin_alloc` and returns
/// its packed location, or `0` when it has nothing to say.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTransport;

impl HostTransport {
    #[cfg(all(target_arch = "wasm32", feature = "host-fetch"))]
    fn call_host(bytes: &[u8]) -> i64 {
        unsafe { ffi::sk_http_request(bytes.as_ptr(), bytes.len()) }
    }

    #[cfg(not(all(target_arch = "wasm32", feature = "host-fetch")))]
    fn call_host(_bytes: &[u8]) -> i64 {
        0
    }

    /// Encode, hand the bytes to `call_host`, decode whatever comes back
    fn exchange(
        request: &HttpRequest,
        call_host: impl FnOnce(&[u8]) -> Option<Vec<u8>>,
    ) -> TransportReply {
        let bytes =
            netgate_api::encode(request).map_err(|e| TransportError::malformed(e.to_string()))?;
        if i32::try_from(bytes.len()).is_err() {
            return Err(TransportError::malformed("request too large for the boundary"));
        }

        let reply = call_host(&bytes)
            .ok_or_else(|| TransportError::unavailable("host returned no reply"))?;

        netgate_api::decode::<TransportReply>(&reply)
            .map_err(|e| TransportError::malformed(format!("undecodable host reply: {}", e)))?
    }
}

impl TransportExecutor for HostTransport {
    fn execute(&self, request: &HttpRequest) -> TransportReply {
        Self::exchange(request, |bytes| {
            let packed = Self::call_host(bytes);
            // Safety: a non-zero reply was allocated and filled by the host
            unsafe { crate::memory::take_host_buffer(packed) }
        })
    }
}

/// Transport selected for this build
#[cfg(feature = "host-fetch")]
pub type DefaultTransport = HostTransport;

/// Transport selected for this build
#[cfg(not(feature = "host-fetch"))]
pub type DefaultTransport = UnavailableTransport;

/// A request waiting for a dispatcher to answer it
#[derive(Debug)]
pub struct TransportJob {
    request: HttpRequest,
    reply: oneshot::Sender<TransportReply>,
}

impl TransportJob {
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Send the outcome back; returns false if the caller already gave up
    pub fn respond(self, reply: TransportReply) -> bool {
        self.reply.send(reply).is_ok()
    }
}

/// Transport that hands requests to a cooperating dispatcher task
///
/// The calling task suspends until the dispatcher answers, so the dispatcher
/// may run on the same thread. Deadlines belong to the dispatcher: it answers
/// `TransportError::Timeout` when it gives up. A dispatcher that is gone, or
/// that drops a job unanswered, yields `Unavailable`.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    jobs: mpsc::Sender<TransportJob>,
}

impl ChannelTransport {
    /// Create the transport and the receiving end for the dispatcher
    ///
    /// `capacity` bounds the queued jobs; at least one is always allowed.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransportJob>) {
        let (jobs, receiver) = mpsc::channel(capacity.max(1));
        (Self { jobs }, receiver)
    }
}

impl AsyncTransportExecutor for ChannelTransport {
    fn dispatch(&self, request: &HttpRequest) -> impl Future<Output = TransportReply> {
        let request = request.clone();
        async move {
            let (reply, answer) = oneshot::channel();
            self.jobs
                .send(TransportJob { request, reply })
                .await
                .map_err(|_| TransportError::unavailable("dispatcher is gone"))?;

            answer
                .await
                .map_err(|_| TransportError::unavailable("dispatcher dropped the request"))?
        }
    }
}
