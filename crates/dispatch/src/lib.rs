//! Broker-side query dispatcher for msq multi-stage queries.
//!
//! Architecture role:
//! - serialize stage plans into their compact wire form;
//! - fan per-server stage-plan bundles out to every participating worker in
//!   parallel under one wall-clock deadline;
//! - drain the local stage-0 mailbox into a tabular result with per-stage
//!   statistics;
//! - best-effort cancel every involved worker when anything fails;
//! - single-server time-series dispatch with a JSON payload.
//!
//! Key modules:
//! - [`client`]: transport contracts and the persistent per-endpoint pools
//! - [`request`]: wire types and per-server request assembly
//! - [`dispatcher`]: the orchestrator, fan-out executor, and reduce runner
//! - [`timeseries`]: the single-server time-series variant
//! - `grpc` (feature-gated): tonic-backed transport implementation
//!
//! Feature flags:
//! - `grpc`: enables tonic-generated RPC clients and the gRPC transport
//!   factory.

pub mod client;
pub mod dispatcher;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod request;
pub mod timeseries;

pub use client::{
    AsyncDispatchResponse, ClientPool, DispatchTransport, TimeSeriesTransport, TransportFactory,
};
pub use dispatcher::{DispatcherConfig, QueryDispatcher, QueryResult};
pub use request::{
    assemble_request, prepare_request_metadata, ExplainResponse, QueryRequest, QueryResponse,
    SerializedStageInfo, StagePlan, TimeSeriesQueryRequest, TimeSeriesResponse, WireStageMetadata,
};
pub use timeseries::BrokerTimeSeriesResponse;
