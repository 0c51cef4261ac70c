//! Message routing table.
//!
//! Grounded on `communication_protocol.py::MessageRouter`, which keeps a
//! direct-connections set as a shortcut ahead of the general routing
//! table.

use dashmap::DashMap;
use orch_types::Route;

use crate::TransportError;

/// Resolves a destination agent id to the [`Route`] a message should take.
#[derive(Debug, Default)]
pub struct Router {
    routes: DashMap<String, Route>,
    direct_connections: DashMap<String, ()>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent_id` as directly reachable, short-circuiting the
    /// general routing table for it.
    pub fn register_direct(&self, agent_id: impl Into<String>) {
        let agent_id = agent_id.into();
        self.direct_connections.insert(agent_id.clone(), ());
        self.routes.insert(agent_id.clone(), Route::direct(agent_id));
    }

    /// Register a multi-hop route to `route.destination`.
    pub fn register_route(&self, route: Route) {
        self.routes.insert(route.destination.clone(), route);
    }

    /// Resolve `destination` to a route, preferring a direct connection.
    pub fn resolve(&self, destination: &str) -> Result<Route, TransportError> {
        if self.direct_connections.contains_key(destination) {
            return Ok(Route::direct(destination));
        }
        self.routes
            .get(destination)
            .map(|r| r.clone())
            .ok_or_else(|| TransportError::NoRoute {
                destination: destination.to_string(),
            })
    }

    /// Remove all routing entries for `agent_id`.
    pub fn unregister(&self, agent_id: &str) {
        self.routes.remove(agent_id);
        self.direct_connections.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_connection_shortcuts_routing_table() {
        let r = Router::new();
        r.register_route(Route {
            destination: "a1".into(),
            next_hop: "hub".into(),
            hop_count: 3,
        });
        r.register_direct("a1");
        let resolved = r.resolve("a1").unwrap();
        assert!(resolved.is_direct());
    }

    #[test]
    fn missing_route_errors() {
        let r = Router::new();
        let err = r.resolve("ghost").unwrap_err();
        assert!(matches!(err, TransportError::NoRoute { .. }));
    }

    #[test]
    fn unregister_clears_both_tables() {
        let r = Router::new();
        r.register_direct("a1");
        r.unregister("a1");
        assert!(r.resolve("a1").is_err());
    }
}
