//! Single wall-clock deadline threaded through every dispatch layer.

use std::time::Duration;
use tokio::time::Instant;

/// Absolute deadline computed once at entry to a public dispatch operation.
///
/// The same value bounds plan serialization waits, request metadata
/// (`timeoutMs`), per-RPC deadlines, response-queue polls, and mailbox block
/// pulls. Whichever layer observes expiry first reports the timeout.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Deadline `timeout_ms` milliseconds from now.
    pub fn after_millis(timeout_ms: u64) -> Self {
        Self {
            expires_at: Instant::now() + Duration::from_millis(timeout_ms),
        }
    }

    /// Absolute expiry instant, for use with `tokio::time::timeout_at`.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Time left before expiry; zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Milliseconds left before expiry; zero once expired.
    pub fn remaining_ms(&self) -> u64 {
        u64::try_from(self.remaining().as_millis()).unwrap_or(u64::MAX)
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}
