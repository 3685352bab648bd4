use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Symbolic selector returned by a routing function.
///
/// Every route a router can return must be mapped to a destination step in
/// the branch table; an unmapped route at run time is a fatal
/// `TrellisError::Routing`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route(String);

impl Route {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Route {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Routing function for a conditional edge: inspects the state and names
/// the next step symbolically.
pub type Router<S> = Box<dyn Fn(&S) -> Route + Send + Sync>;

/// Outgoing transition of a step. A step has at most one of these.
pub(crate) enum Edge<S> {
    /// Always advance to the named step.
    Direct(String),
    /// Consult the router and look its route up in the table.
    Branch {
        router: Router<S>,
        routes: HashMap<Route, String>,
    },
}
