//! Plan-side types consumed by the msq broker dispatcher.
//!
//! Architecture role:
//! - the closed plan-node tree shipped to workers ([`plan_node`]);
//! - routing metadata naming servers and logical workers ([`routing`]);
//! - dispatchable sub-plans produced by the upstream planner ([`subplan`]);
//! - deterministic wire (de)serialization of plans and properties
//!   ([`serde_util`]).

pub mod plan_node;
pub mod routing;
pub mod serde_util;
pub mod subplan;

pub use plan_node::{
    AggregateNode, ExchangeType, FilterNode, HashJoinNode, JoinType, LimitNode,
    MailboxReceiveNode, MailboxSendNode, PlanNode, ProjectNode, SortKey, SortNode, TableScanNode,
    ValuesNode,
};
pub use routing::{ServerInstance, StageMetadata, WorkerMetadata};
pub use serde_util::{
    deserialize_plan_node, deserialize_properties, serialize_plan_node, serialize_properties,
};
pub use subplan::{
    DispatchableStagePlan, DispatchableSubPlan, ResultField, TimeBuckets,
    TimeSeriesDispatchablePlan,
};
