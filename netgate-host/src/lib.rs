//! netgate-host: Wasm host runtime for capability-gated networking
//!
//! Guests built with `netgate-sdk` import two functions from the `env`
//! module. This crate answers them:
//!
//! - `sk_has_capability` consults a [`CapabilityStore`] for the calling plugin
//! - `sk_http_request` re-checks `"network"`, then hands the request to an
//!   [`HttpHandler`] and writes the reply back into guest memory
//!
//! ```rust
//! use netgate_host::{MemoryCapabilityStore, PluginLoader};
//! use std::sync::Arc;
//!
//! let grants = Arc::new(MemoryCapabilityStore::new().with_grant("weather", "network"));
//! let loader = PluginLoader::builder().capabilities(grants).build().unwrap();
//! let plugin = loader
//!     .load("weather", br#"(module (memory (export "memory") 1))"#)
//!     .unwrap();
//! assert_eq!(plugin.plugin_id(), "weather");
//! ```

pub mod audit;
pub mod capability;
pub mod config;
pub mod handler;
pub mod imports;
pub mod loader;

pub use audit::{AuditEvent, AuditEventType, AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
pub use capability::{CapabilityStore, MemoryCapabilityStore};
pub use config::{ConfigError, HostConfig};
pub use handler::{HttpHandler, RequestContext, UnavailableHandler};
pub use imports::{HostState, ImportError};
pub use loader::{LoaderError, PluginInstance, PluginLoader, PluginLoaderBuilder};
pub use netgate_api::{HttpRequest, HttpResponse, TransportError, TransportReply};
