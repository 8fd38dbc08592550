//! netgate-sdk: capability-gated HTTP for Wasm plugins
//!
//! Plugins cannot open sockets or trust their own idea of what they are
//! allowed to do. Every network operation in this crate first asks the host
//! whether the `"network"` capability is granted *on that call*, and only
//! then hands the request to a transport.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use netgate_sdk::prelude::*;
//!
//! // Required so the host can write replies into guest memory
//! netgate_sdk::export_allocator!();
//!
//! #[no_mangle]
//! pub extern "C" fn refresh() -> i32 {
//!     if !has_network_capability() {
//!         return 0;
//!     }
//!     match http_get("https://api.example.com/status") {
//!         Some(body) => body.len() as i32,
//!         None => -1,
//!     }
//! }
//! ```
//!
//! ## Testing plugin code natively
//!
//! ```rust
//! use netgate_sdk::prelude::*;
//! use netgate_sdk::{HttpRequest, HttpResponse, TransportReply};
//!
//! struct Canned;
//!
//! impl TransportExecutor for Canned {
//!     fn execute(&self, _request: &HttpRequest) -> TransportReply {
//!         Ok(HttpResponse::new(200, "ok"))
//!     }
//! }
//!
//! let net = Network::new(FixedOracle::granted(), Canned);
//! assert_eq!(net.get("https://example.com").as_deref(), Some("ok"));
//!
//! let net = Network::new(FixedOracle::denied(), Canned);
//! assert_eq!(net.post("https://example.com", "{}"), -1);
//! ```
//!
//! ## Feature Flags
//!
//! - `host-fetch`: route requests through the host import `sk_http_request`.
//!   Without it the default transport is [`transport::UnavailableTransport`]
//!   and every granted request fails with the sentinel.

pub mod error;
pub mod gate;
pub mod http;
pub mod memory;
pub mod oracle;
pub mod transport;

// Re-export the boundary protocol
pub use netgate_api::*;

pub use error::NetError;
pub use gate::CapabilityGate;
pub use http::{
    default_network, has_network_capability, http_delete, http_get, http_post,
    http_post_with_response, http_put, http_request, Network,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::gate::CapabilityGate;
    pub use crate::http::{
        has_network_capability, http_delete, http_get, http_post, http_post_with_response,
        http_put, http_request, Network,
    };
    pub use crate::oracle::{CapabilityOracle, FixedOracle, HostOracle, SharedOracle};
    pub use crate::transport::{
        AsyncTransportExecutor, ChannelTransport, DefaultTransport, HostTransport,
        TransportExecutor, UnavailableTransport,
    };
    pub use crate::{export_allocator, memory};
}

/// Export the allocator the host uses to write replies into guest memory
///
/// Generates `plugin_alloc` and `plugin_dealloc`.
///
/// # Example
///
/// ```rust,ignore
/// netgate_sdk::export_allocator!();
/// ```
#[macro_export]
macro_rules! export_allocator {
    () => {
        #[no_mangle]
        pub extern "C" fn plugin_alloc(size: i32) -> i32 {
            $crate::memory::plugin_alloc(size)
        }

        #[no_mangle]
        pub extern "C" fn plugin_dealloc(ptr: i32, size: i32) {
            $crate::memory::plugin_dealloc(ptr, size)
        }
    };
}
