//! Route descriptors registered at configuration time.

use serde::{Deserialize, Serialize};

/// Event descriptor stored against a route key (e.g. `$connect`, `sendMessage`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    /// Route selection value matched against inbound messages
    pub route: String,
    /// Name of the handler the route dispatches to
    pub handler: String,
}

impl RouteDescriptor {
    pub fn new(route: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            handler: handler.into(),
        }
    }

    /// Parse a `ROUTE=HANDLER` pair as accepted on the command line.
    pub fn parse_pair(pair: &str) -> Option<Self> {
        let (route, handler) = pair.split_once('=')?;
        let (route, handler) = (route.trim(), handler.trim());
        if route.is_empty() || handler.is_empty() {
            return None;
        }
        Some(Self::new(route, handler))
    }
}
