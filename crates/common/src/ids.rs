//! Typed identifiers shared across dispatcher components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque 64-bit request identifier, unique per submission.
///
/// All workers and all telemetry for one submission are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(
    /// Raw numeric id value.
    pub u64,
);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        RequestId(value)
    }
}
