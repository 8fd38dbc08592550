//! Capability gate for network operations

use crate::memory::BoundaryStr;
use crate::oracle::CapabilityOracle;
use netgate_api::{CAPABILITY_GRANTED, NETWORK_CAPABILITY};

/// Single choke point every network operation passes through
///
/// Holds no decision state: each call goes back to the oracle, so a grant
/// revoked by the host takes effect on the next operation.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate<O> {
    oracle: O,
}

impl<O: CapabilityOracle> CapabilityGate<O> {
    /// Capability name checked by this gate
    pub const CAPABILITY: &'static str = NETWORK_CAPABILITY;

    pub fn new(oracle: O) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Ask the host whether `"network"` is currently granted
    pub fn has_network_capability(&self) -> bool {
        let name = match BoundaryStr::new(Self::CAPABILITY) {
            Ok(name) => name,
            Err(e) => {
                tracing::warn!(error = %e, "capability name could not be marshaled");
                return false;
            }
        };

        let answer = self.oracle.has_capability(name);
        let granted = answer == CAPABILITY_GRANTED;
        tracing::trace!(capability = Self::CAPABILITY, answer, granted, "capability checked");
        granted
    }
}
