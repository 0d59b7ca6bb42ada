//! Shared building blocks for the msq broker-side dispatcher.
//!
//! Architecture role:
//! - canonical error taxonomy and `Result` alias;
//! - typed request identifiers and the wall-clock [`Deadline`];
//! - result schema, column types, and value externalization;
//! - request/response metadata keys and the wire plan version;
//! - Prometheus metrics registry for dispatch telemetry.

pub mod deadline;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod options;
pub mod schema;

pub use deadline::Deadline;
pub use error::{MsqError, Result};
pub use ids::RequestId;
pub use schema::{ColumnDataType, DataSchema, ResultTable, Value};
