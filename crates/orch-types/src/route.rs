//! Routing table entries for the transport's message router.
//!
//! Grounded on `communication_protocol.py::Route`/`MessageRouter`.

use serde::{Deserialize, Serialize};

/// A routing rule: messages addressed to `destination` are delivered via
/// `next_hop`, optionally direct-connected for a shortcut path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// Final recipient id this route resolves.
    pub destination: String,
    /// Immediate hop to deliver to (equal to `destination` for direct
    /// connections).
    pub next_hop: String,
    /// Number of hops to the destination; `0` for a direct connection.
    pub hop_count: u32,
}

impl Route {
    /// A direct route with no intermediate hops.
    pub fn direct(destination: impl Into<String>) -> Self {
        let destination = destination.into();
        Self {
            next_hop: destination.clone(),
            destination,
            hop_count: 0,
        }
    }

    /// Whether this route delivers straight to the destination.
    pub fn is_direct(&self) -> bool {
        self.hop_count == 0 && self.next_hop == self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_route_is_direct() {
        let r = Route::direct("agent-1");
        assert!(r.is_direct());
    }

    #[test]
    fn indirect_route_is_not_direct() {
        let r = Route {
            destination: "agent-2".into(),
            next_hop: "router-a".into(),
            hop_count: 2,
        };
        assert!(!r.is_direct());
    }
}
