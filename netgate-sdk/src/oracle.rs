//! Capability oracle: the guest's only way to ask the host about grants
//!
//! The host is authoritative. An oracle answers with the raw integer from the
//! boundary call; only `1` means granted.

use crate::memory::BoundaryStr;
use netgate_api::CAPABILITY_GRANTED;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Answers "does this plugin instance hold capability `name`?"
pub trait CapabilityOracle {
    /// Returns `1` if granted, any other value if not
    fn has_capability(&self, name: BoundaryStr<'_>) -> i32;
}

impl<O: CapabilityOracle + ?Sized> CapabilityOracle for &O {
    fn has_capability(&self, name: BoundaryStr<'_>) -> i32 {
        (**self).has_capability(name)
    }
}

#[cfg(target_arch = "wasm32")]
mod ffi {
    #[link(wasm_import_module = "env")]
    extern "C" {
        pub fn sk_has_capability(cap_ptr: *const u8, cap_len: usize) -> i32;
    }
}

/// Oracle backed by the host's `sk_has_capability` import
///
/// Outside wasm32 there is no host to ask, so every capability is denied.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostOracle;

impl CapabilityOracle for HostOracle {
    #[cfg(target_arch = "wasm32")]
    fn has_capability(&self, name: BoundaryStr<'_>) -> i32 {
        unsafe { ffi::sk_has_capability(name.ptr(), name.len()) }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn has_capability(&self, name: BoundaryStr<'_>) -> i32 {
        tracing::trace!(capability = name.as_str(), "no host oracle on this target");
        0
    }
}

/// Oracle with a fixed answer, for native tests of plugin code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedOracle {
    answer: i32,
}

impl FixedOracle {
    pub fn granted() -> Self {
        Self {
            answer: CAPABILITY_GRANTED,
        }
    }

    pub fn denied() -> Self {
        Self { answer: 0 }
    }

    /// Answer with an arbitrary raw value
    pub fn returning(answer: i32) -> Self {
        Self { answer }
    }
}

impl CapabilityOracle for FixedOracle {
    fn has_capability(&self, _name: BoundaryStr<'_>) -> i32 {
        self.answer
    }
}

/// Oracle whose answer can be changed between calls
///
/// Clones share state, so a test can keep one handle, give another to the
/// code under test, and grant or revoke while it runs.
#[derive(Debug, Clone, Default)]
pub struct SharedOracle {
    answer: Arc<AtomicI32>,
    calls: Arc<AtomicUsize>,
    queried: Arc<Mutex<Vec<String>>>,
}

impl SharedOracle {
    /// Create a shared oracle that starts out denying
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_granted(&self, granted: bool) {
        let answer = if granted { CAPABILITY_GRANTED } else { 0 };
        self.answer.store(answer, Ordering::SeqCst);
    }

    /// Number of boundary calls answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Capability names queried, in order
    pub fn queried(&self) -> Vec<String> {
        self.queried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CapabilityOracle for SharedOracle {
    fn has_capability(&self, name: BoundaryStr<'_>) -> i32 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queried
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.as_str().to_string());
        self.answer.load(Ordering::SeqCst)
    }
}
