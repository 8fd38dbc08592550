//! Host functions imported by guests
//!
//! ```text
//! guest                                   host
//! ─────                                   ────
//! sk_has_capability(ptr, len) ──────────► read name ──► CapabilityStore
//!                              ◄────────── 1 | 0
//!
//! sk_http_request(ptr, len)  ──────────► re-check "network"
//!                                         decode HttpRequest
//!                                         HttpHandler::handle
//!                                         plugin_alloc + write TransportReply
//!                              ◄────────── packed ptr/len | 0
//! ```
//!
//! Neither function traps on bad guest input. A capability query that
//! cannot be read is answered `0`; a request that cannot be read gets an
//! error reply, and `0` only when no reply can be written at all.

use crate::audit::{self, AuditEvent, AuditEventType, AuditSink};
use crate::capability::CapabilityStore;
use crate::config::HostConfig;
use crate::handler::{HttpHandler, RequestContext};
use netgate_api::{
    pack_ptr_len, CodecError, HttpRequest, TransportError, TransportReply, ALLOC_EXPORT,
    CAPABILITY_GRANTED, HAS_CAPABILITY_IMPORT, HTTP_REQUEST_IMPORT, IMPORT_MODULE,
    MEMORY_EXPORT, NETWORK_CAPABILITY,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use wasmtime::{Caller, Extern, Linker, Memory, MemoryAccessError};

/// Failures moving bytes in and out of guest memory
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Guest does not export '{0}'")]
    MissingExport(&'static str),

    #[error("Guest memory access out of bounds: ptr={ptr}, len={len}")]
    OutOfBounds { ptr: i32, len: i32 },

    #[error("Reply of {0} bytes does not fit in guest memory")]
    TooLarge(usize),

    #[error("Guest allocation failed: {0}")]
    Allocation(#[source] anyhow::Error),

    #[error("Failed to write guest memory: {0}")]
    Write(#[source] MemoryAccessError),

    #[error("Failed to encode reply: {0}")]
    Encode(#[from] CodecError),
}

/// Per-instance state stored alongside each plugin
pub struct HostState {
    plugin_id: String,
    capabilities: Arc<dyn CapabilityStore>,
    handler: Arc<dyn HttpHandler>,
    audit: Arc<dyn AuditSink>,
    config: HostConfig,
}

impl HostState {
    pub fn new(
        plugin_id: impl Into<String>,
        capabilities: Arc<dyn CapabilityStore>,
        handler: Arc<dyn HttpHandler>,
        audit: Arc<dyn AuditSink>,
        config: HostConfig,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            capabilities,
            handler,
            audit,
            config,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn record(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(event) {
            tracing::warn!(plugin = %self.plugin_id, error = %e, "failed to record audit event");
        }
    }

    /// Answer a capability query from the store
    pub fn check_capability(&self, capability: &str) -> bool {
        let granted = self
            .capabilities
            .has_capability(&self.plugin_id, capability);
        tracing::debug!(plugin = %self.plugin_id, capability, granted, "capability query");
        self.record(audit::capability_checked(
            &self.plugin_id,
            capability,
            granted,
        ));
        granted
    }

    /// Decode, authorize and perform a request read from guest memory
    ///
    /// The capability is checked before anything else, so every attempt by an
    /// ungranted plugin is answered `Denied` and audited as such.
    pub fn handle_request(&self, bytes: &[u8]) -> TransportReply {
        // The guest checked already, but the host does not take its word
        if !self.check_capability(NETWORK_CAPABILITY) {
            return Err(self.deny(Some(bytes)));
        }

        if bytes.len() > self.config.max_request_bytes {
            tracing::warn!(plugin = %self.plugin_id, len = bytes.len(), "request too large");
            return Err(TransportError::malformed(format!(
                "request of {} bytes exceeds limit of {}",
                bytes.len(),
                self.config.max_request_bytes
            )));
        }

        let request: HttpRequest = netgate_api::decode(bytes)
            .map_err(|e| TransportError::malformed(format!("undecodable request: {}", e)))?;
        request
            .validate()
            .map_err(|e| TransportError::malformed(e.to_string()))?;

        let ctx = RequestContext {
            plugin_id: self.plugin_id.clone(),
            timeout: self.config.request_timeout(),
        };
        let reply = panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(&ctx, &request)))
            .unwrap_or_else(|_| {
                Err(TransportError::Connection("http handler panicked".into()))
            });

        let reply = match reply {
            Ok(response) if response.body.len() > self.config.max_response_bytes => {
                Err(TransportError::malformed(format!(
                    "response body of {} bytes exceeds limit of {}",
                    response.body.len(),
                    self.config.max_response_bytes
                )))
            }
            other => other,
        };

        match &reply {
            Ok(response) => {
                tracing::debug!(
                    plugin = %self.plugin_id,
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    "request completed"
                );
                self.record_request(
                    AuditEventType::NetworkCompleted,
                    &request,
                    Some(response.status),
                    None,
                );
            }
            Err(e) if e.is_unavailable() => {
                tracing::debug!(plugin = %self.plugin_id, url = %request.url, "transport unavailable");
                self.record_request(
                    AuditEventType::TransportUnavailable,
                    &request,
                    None,
                    Some(e.to_string()),
                );
            }
            Err(e) => {
                tracing::warn!(
                    plugin = %self.plugin_id,
                    url = %request.url,
                    kind = e.kind(),
                    error = %e,
                    "request failed"
                );
                self.record_request(AuditEventType::NetworkFailed, &request, None, Some(e.to_string()));
            }
        }

        reply
    }

    /// Answer a request whose bytes could not be read from guest memory
    pub fn handle_unreadable(&self, reason: &str) -> TransportReply {
        if !self.check_capability(NETWORK_CAPABILITY) {
            return Err(self.deny(None));
        }
        Err(TransportError::malformed(reason))
    }

    fn deny(&self, bytes: Option<&[u8]>) -> TransportError {
        // Describe the attempt only when it is small enough to decode
        let request = bytes
            .filter(|b| b.len() <= self.config.max_request_bytes)
            .and_then(|b| netgate_api::decode::<HttpRequest>(b).ok());
        let (method, url) = request
            .as_ref()
            .map_or(("", ""), |r| (r.method.as_str(), r.url.as_str()));

        tracing::debug!(plugin = %self.plugin_id, method, url, "request denied");
        self.record(audit::network_event(
            AuditEventType::NetworkDenied,
            &self.plugin_id,
            method,
            url,
            None,
            None,
        ));
        TransportError::Denied
    }

    fn record_request(
        &self,
        event_type: AuditEventType,
        request: &HttpRequest,
        status: Option<i32>,
        error: Option<String>,
    ) {
        self.record(audit::network_event(
            event_type,
            &self.plugin_id,
            &request.method,
            &request.url,
            status,
            error,
        ));
    }
}

impl std::fmt::Debug for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostState")
            .field("plugin_id", &self.plugin_id)
            .field("config", &self.config)
            .finish()
    }
}

/// Register `env.sk_has_capability` and `env.sk_http_request`
pub fn add_to_linker(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        HAS_CAPABILITY_IMPORT,
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            has_capability(caller, ptr, len)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        HTTP_REQUEST_IMPORT,
        |caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i64 {
            http_request(caller, ptr, len)
        },
    )?;
    Ok(())
}

fn has_capability(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> i32 {
    let name = read_guest(&mut caller, ptr, len).map(String::from_utf8);
    match name {
        Ok(Ok(name)) => {
            if caller.data().check_capability(&name) {
                CAPABILITY_GRANTED
            } else {
                0
            }
        }
        Ok(Err(_)) => {
            tracing::warn!(plugin = %caller.data().plugin_id, "capability name is not UTF-8, denying");
            0
        }
        Err(e) => {
            tracing::warn!(plugin = %caller.data().plugin_id, error = %e, "unreadable capability query, denying");
            0
        }
    }
}

fn http_request(mut caller: Caller<'_, HostState>, ptr: i32, len: i32) -> i64 {
    let reply = match read_guest(&mut caller, ptr, len) {
        Ok(bytes) => caller.data().handle_request(&bytes),
        Err(e) => {
            tracing::warn!(plugin = %caller.data().plugin_id, error = %e, "unreadable request");
            caller.data().handle_unreadable(&e.to_string())
        }
    };

    match write_reply(&mut caller, &reply) {
        Ok(packed) => packed,
        Err(e) => {
            tracing::warn!(plugin = %caller.data().plugin_id, error = %e, "failed to deliver reply");
            0
        }
    }
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, ImportError> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
        .ok_or(ImportError::MissingExport(MEMORY_EXPORT))
}

fn read_guest(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<Vec<u8>, ImportError> {
    if len < 0 {
        return Err(ImportError::OutOfBounds { ptr, len });
    }
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let start = ptr as u32 as usize;
    start
        .checked_add(len as usize)
        .and_then(|end| data.get(start..end))
        .map(<[u8]>::to_vec)
        .ok_or(ImportError::OutOfBounds { ptr, len })
}

fn write_reply(caller: &mut Caller<'_, HostState>, reply: &TransportReply) -> Result<i64, ImportError> {
    let bytes = netgate_api::encode(reply)?;
    let len = i32::try_from(bytes.len()).map_err(|_| ImportError::TooLarge(bytes.len()))?;

    let alloc = caller
        .get_export(ALLOC_EXPORT)
        .and_then(Extern::into_func)
        .ok_or(ImportError::MissingExport(ALLOC_EXPORT))?
        .typed::<i32, i32>(&*caller)
        .map_err(ImportError::Allocation)?;
    let ptr = alloc
        .call(&mut *caller, len)
        .map_err(ImportError::Allocation)?;
    if ptr == 0 {
        return Err(ImportError::Allocation(anyhow::anyhow!(
            "{} returned null for {} bytes",
            ALLOC_EXPORT,
            len
        )));
    }

    let memory = guest_memory(caller)?;
    memory
        .write(&mut *caller, ptr as u32 as usize, &bytes)
        .map_err(ImportError::Write)?;

    Ok(pack_ptr_len(ptr, len))
}
