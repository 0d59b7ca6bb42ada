use thiserror::Error;

use crate::ids::RequestId;

/// Canonical msq error taxonomy used across crates.
///
/// Classification guidance:
/// - [`MsqError::Dispatch`]: failure reported by or while communicating with a
///   specific worker server
/// - [`MsqError::Explain`]: a worker flagged an explain response with a status
///   error, or its plan payload could not be decoded
/// - [`MsqError::Timeout`]: the request deadline expired in serialization,
///   fan-out, or reduce
/// - [`MsqError::Reduce`]: the reduce stream terminated with an error block
///   carrying worker-reported exceptions
/// - [`MsqError::Invariant`]: structural precondition violated; these are
///   planner/programmer bugs, not runtime conditions
/// - [`MsqError::Transport`]: client construction or raw RPC transport failure
/// - [`MsqError::Serde`]: plan or properties encode/decode failure
#[derive(Debug, Error)]
pub enum MsqError {
    /// Dispatch to one server failed; carries the offending server id.
    #[error("error dispatching query {request_id} to server {server}: {message}")]
    Dispatch {
        /// Request the dispatch belonged to.
        request_id: RequestId,
        /// Server that failed or reported the failure.
        server: String,
        /// Failure detail, typically the transport error or server status.
        message: String,
    },

    /// Explain on one server failed or returned an undecodable plan.
    #[error("unable to explain query {request_id} on server {server}: {message}")]
    Explain {
        /// Request the explain belonged to.
        request_id: RequestId,
        /// Server that produced the failing response.
        server: String,
        /// Failure detail.
        message: String,
    },

    /// The single wall-clock deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The reduce stream ended with an error block.
    #[error("received error query execution result block: {0:?}")]
    Reduce(Vec<String>),

    /// Structural precondition violated.
    ///
    /// Examples:
    /// - reduce-stage root is not a mailbox receive node
    /// - reduce stage has more than one worker
    /// - query stats arrive for a stage other than 0
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Client construction or raw transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Plan/properties encode or decode failure.
    #[error("serde error: {0}")]
    Serde(String),
}

impl MsqError {
    /// Short stable name of the error kind, used where failures are folded
    /// into structured responses instead of being rethrown.
    pub fn kind(&self) -> &'static str {
        match self {
            MsqError::Dispatch { .. } => "DispatchError",
            MsqError::Explain { .. } => "ExplainError",
            MsqError::Timeout(_) => "TimeoutError",
            MsqError::Reduce(_) => "ReduceError",
            MsqError::Invariant(_) => "InvariantError",
            MsqError::Transport(_) => "TransportError",
            MsqError::Serde(_) => "SerdeError",
        }
    }
}

/// Standard msq result alias.
pub type Result<T> = std::result::Result<T, MsqError>;
