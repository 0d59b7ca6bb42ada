//! Dispatchable sub-plans handed to the broker dispatcher.
//!
//! Contract:
//! - stage 0 is the local reduce stage: its root is a mailbox receive node
//!   and its worker list has exactly one entry (the broker itself);
//! - stages 1..N are remote; their `server_to_worker_ids` values index into
//!   the stage's `worker_metadata` list;
//! - `custom_properties` are opaque key/value pairs forwarded verbatim.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::plan_node::PlanNode;
use crate::routing::{ServerInstance, WorkerMetadata};

/// One fragment of a multi-stage plan, pinned to a set of workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchableStagePlan {
    /// Fragment root and descendants.
    pub root: PlanNode,
    /// Which logical workers on each server execute this stage.
    pub server_to_worker_ids: HashMap<ServerInstance, Vec<usize>>,
    /// All workers of this stage, indexed by the worker ids above.
    pub worker_metadata: Vec<WorkerMetadata>,
    /// Opaque stage-level properties.
    pub custom_properties: BTreeMap<String, String>,
}

impl DispatchableStagePlan {
    /// Servers participating in this stage.
    pub fn servers(&self) -> impl Iterator<Item = &ServerInstance> {
        self.server_to_worker_ids.keys()
    }
}

/// `(source column index, output column name)` projection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultField {
    /// Index into the reduce stage's source schema.
    pub source_index: usize,
    /// Output column name.
    pub name: String,
}

/// Ordered stage list plus the result projection.
///
/// Index 0 is the reduce stage and executes broker-side; indices 1..N are
/// remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchableSubPlan {
    /// Stage plans, reduce stage first.
    pub stage_plans: Vec<DispatchableStagePlan>,
    /// Projection from the reduce stage's source schema to the result table.
    pub result_fields: Vec<ResultField>,
}

/// Time window of a time-series query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBuckets {
    /// Window start, epoch seconds.
    pub start_seconds: i64,
    /// Bucket width, seconds.
    pub bucket_seconds: i64,
    /// Number of buckets in the window.
    pub num_buckets: usize,
}

/// Single-server time-series plan with a text-serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesDispatchablePlan {
    /// Query language of the serialized plan.
    pub language: String,
    /// Serialized dispatch plan, shipped UTF-8 encoded.
    pub serialized_plan: String,
    /// The one server addressed by this plan.
    pub server: ServerInstance,
    /// Query time window.
    pub time_buckets: TimeBuckets,
    /// Segments to scan per plan fragment id.
    pub plan_id_to_segments: BTreeMap<String, Vec<String>>,
}
