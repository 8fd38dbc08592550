//! Capability grants as seen by the host
//!
//! The host is the authority on what each plugin instance may do. Grants can
//! change while a plugin is running; the imports ask the store again on
//! every call.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

/// Source of truth for capability grants
///
/// Implementations must fail closed: if the answer cannot be determined,
/// return `false`.
pub trait CapabilityStore: Send + Sync {
    fn has_capability(&self, plugin_id: &str, capability: &str) -> bool;
}

/// In-memory grant table, mutable at runtime
#[derive(Debug, Default)]
pub struct MemoryCapabilityStore {
    grants: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryCapabilityStore {
    /// Create an empty store (everything denied)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style grant
    pub fn with_grant(self, plugin_id: &str, capability: &str) -> Self {
        self.grant(plugin_id, capability);
        self
    }

    pub fn grant(&self, plugin_id: &str, capability: &str) {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        grants
            .entry(plugin_id.to_string())
            .or_default()
            .insert(capability.to_string());
        tracing::debug!(plugin = plugin_id, capability, "capability granted");
    }

    /// Revoke one capability; returns whether it was held
    pub fn revoke(&self, plugin_id: &str, capability: &str) -> bool {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        let revoked = grants
            .get_mut(plugin_id)
            .map(|caps| caps.remove(capability))
            .unwrap_or(false);
        if revoked {
            tracing::debug!(plugin = plugin_id, capability, "capability revoked");
        }
        revoked
    }

    /// Revoke everything held by a plugin; returns whether it held anything
    pub fn revoke_all(&self, plugin_id: &str) -> bool {
        let mut grants = self.grants.write().unwrap_or_else(PoisonError::into_inner);
        grants
            .remove(plugin_id)
            .map(|caps| !caps.is_empty())
            .unwrap_or(false)
    }

    /// Capabilities held by a plugin, sorted
    pub fn granted(&self, plugin_id: &str) -> Vec<String> {
        let grants = self.grants.read().unwrap_or_else(PoisonError::into_inner);
        let mut caps: Vec<String> = grants
            .get(plugin_id)
            .map(|caps| caps.iter().cloned().collect())
            .unwrap_or_default();
        caps.sort();
        caps
    }
}

impl CapabilityStore for MemoryCapabilityStore {
    fn has_capability(&self, plugin_id: &str, capability: &str) -> bool {
        match self.grants.read() {
            Ok(grants) => grants
                .get(plugin_id)
                .is_some_and(|caps| caps.contains(capability)),
            Err(_) => {
                tracing::warn!(plugin = plugin_id, capability, "grant table poisoned, denying");
                false
            }
        }
    }
}
