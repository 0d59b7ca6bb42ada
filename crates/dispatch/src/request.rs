//! Wire request/response types and per-server request assembly.
//!
//! A [`QueryRequest`] for one server carries exactly the stages that server
//! participates in, each with its worker-metadata list projected down to the
//! worker ids assigned to that server. Wire stage ids are 1-based: the local
//! reduce stage is never shipped.

use std::collections::{BTreeMap, HashMap};

use msq_common::deadline::Deadline;
use msq_common::error::{MsqError, Result};
use msq_common::ids::RequestId;
use msq_common::options;
use msq_planner::routing::{ServerInstance, WorkerMetadata};
use msq_planner::subplan::DispatchableStagePlan;

/// Immutable serialized form of one stage plan, shared across all per-server
/// request assemblies of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedStageInfo {
    /// Serialized fragment root.
    pub root_node: Vec<u8>,
    /// Serialized custom properties.
    pub custom_property: Vec<u8>,
}

/// Stage metadata as shipped on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireStageMetadata {
    /// 1-based remote stage id.
    pub stage_id: i32,
    /// Workers of this stage assigned to the destination server, in the
    /// order the stage's worker-id list names them.
    pub worker_metadata: Vec<WorkerMetadata>,
    /// Serialized custom properties.
    pub custom_property: Vec<u8>,
}

/// One stage entry of a [`QueryRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    /// Serialized fragment root.
    pub root_node: Vec<u8>,
    /// Wire stage metadata.
    pub stage_metadata: WireStageMetadata,
}

/// Per-server stage-plan bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Wire protocol version.
    pub version: i32,
    /// Stages the destination server participates in, in stage order.
    pub stage_plans: Vec<StagePlan>,
    /// Serialized request metadata (request id, timeout, query options).
    pub metadata: Vec<u8>,
}

/// Worker response to a submit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResponse {
    /// Response metadata; `STATUS_ERROR` marks a failure.
    pub metadata: HashMap<String, String>,
}

/// Worker response to an explain.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplainResponse {
    /// Serialized plan trees as the worker would execute them.
    pub stage_plans: Vec<StagePlan>,
    /// Response metadata; `STATUS_ERROR` marks a failure.
    pub metadata: HashMap<String, String>,
}

/// Single-server time-series request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesQueryRequest {
    /// UTF-8 encoded serialized dispatch plan.
    pub dispatch_plan: Vec<u8>,
    /// Request metadata (language, window, segments, request id).
    pub metadata: BTreeMap<String, String>,
}

/// Single-server time-series response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TimeSeriesResponse {
    /// JSON payload of the broker response shape.
    pub payload: Vec<u8>,
    /// Response metadata; `errorMessage` marks a failure.
    pub metadata: HashMap<String, String>,
}

/// Assemble the request for one destination server.
///
/// Stages the server does not participate in are skipped; for the rest the
/// stage's worker metadata is projected, order-preserving, to the worker ids
/// assigned to this server. Wire stage ids equal `index + 1` over
/// `stage_plans` regardless of how the caller built that list.
pub fn assemble_request(
    server: &ServerInstance,
    stage_plans: &[DispatchableStagePlan],
    stage_infos: &[SerializedStageInfo],
    request_metadata: &[u8],
    version: i32,
) -> Result<QueryRequest> {
    let mut wire_stage_plans = Vec::new();
    for (index, stage_plan) in stage_plans.iter().enumerate() {
        let stage_id = (index + 1) as i32;
        let Some(worker_ids) = stage_plan.server_to_worker_ids.get(server) else {
            // This server does not execute this stage.
            continue;
        };
        let mut worker_metadata = Vec::with_capacity(worker_ids.len());
        for &worker_id in worker_ids {
            let metadata = stage_plan.worker_metadata.get(worker_id).ok_or_else(|| {
                MsqError::Invariant(format!(
                    "worker id {worker_id} out of range for stage {stage_id} on server {server}"
                ))
            })?;
            worker_metadata.push(metadata.clone());
        }
        let stage_info = stage_infos.get(index).ok_or_else(|| {
            MsqError::Invariant(format!("missing serialized stage info for stage {stage_id}"))
        })?;
        wire_stage_plans.push(StagePlan {
            root_node: stage_info.root_node.clone(),
            stage_metadata: WireStageMetadata {
                stage_id,
                worker_metadata,
                custom_property: stage_info.custom_property.clone(),
            },
        });
    }
    Ok(QueryRequest {
        version,
        stage_plans: wire_stage_plans,
        metadata: request_metadata.to_vec(),
    })
}

/// Request metadata common to every server of one submission.
///
/// User-supplied query options are copied verbatim but never shadow the
/// reserved `requestId`/`timeoutMs` entries.
pub fn prepare_request_metadata(
    request_id: RequestId,
    query_options: &BTreeMap<String, String>,
    deadline: &Deadline,
) -> BTreeMap<String, String> {
    let mut metadata = query_options.clone();
    metadata.insert(
        options::request::REQUEST_ID.to_string(),
        request_id.to_string(),
    );
    metadata.insert(
        options::request::TIMEOUT_MS.to_string(),
        deadline.remaining_ms().to_string(),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_common::options::PLAN_VERSION_V1;
    use msq_common::schema::{ColumnDataType, DataSchema};
    use msq_planner::plan_node::{ExchangeType, MailboxSendNode, PlanNode, TableScanNode};

    fn schema() -> DataSchema {
        DataSchema {
            column_names: vec!["k".to_string()],
            column_types: vec![ColumnDataType::Long],
        }
    }

    fn scan_root() -> PlanNode {
        PlanNode::MailboxSend(MailboxSendNode {
            data_schema: schema(),
            receiver_stage_id: 0,
            exchange: ExchangeType::Singleton,
            input: Box::new(PlanNode::TableScan(TableScanNode {
                data_schema: schema(),
                table: "t".to_string(),
                columns: vec!["k".to_string()],
            })),
        })
    }

    fn worker(server: &ServerInstance, worker_id: u32) -> WorkerMetadata {
        WorkerMetadata {
            worker_id,
            server: server.clone(),
            custom_properties: BTreeMap::new(),
        }
    }

    fn stage(assignments: &[(&ServerInstance, Vec<usize>)]) -> DispatchableStagePlan {
        let mut worker_metadata = Vec::new();
        let mut server_to_worker_ids = HashMap::new();
        for (server, worker_ids) in assignments {
            for &id in worker_ids {
                while worker_metadata.len() <= id {
                    worker_metadata.push(worker(server, worker_metadata.len() as u32));
                }
            }
            server_to_worker_ids.insert((*server).clone(), worker_ids.clone());
        }
        DispatchableStagePlan {
            root: scan_root(),
            server_to_worker_ids,
            worker_metadata,
            custom_properties: BTreeMap::new(),
        }
    }

    fn infos(n: usize) -> Vec<SerializedStageInfo> {
        (0..n)
            .map(|i| SerializedStageInfo {
                root_node: vec![i as u8],
                custom_property: vec![],
            })
            .collect()
    }

    #[test]
    fn includes_stage_iff_server_participates() {
        let a = ServerInstance::new("a", 1, 2);
        let b = ServerInstance::new("b", 1, 2);
        let stages = vec![
            stage(&[(&a, vec![0])]),
            stage(&[(&b, vec![0])]),
            stage(&[(&a, vec![0]), (&b, vec![1])]),
        ];

        let request =
            assemble_request(&a, &stages, &infos(3), b"{}", PLAN_VERSION_V1).unwrap();
        let stage_ids: Vec<i32> = request
            .stage_plans
            .iter()
            .map(|p| p.stage_metadata.stage_id)
            .collect();
        assert_eq!(stage_ids, vec![1, 3]);
    }

    #[test]
    fn stage_ids_are_one_based_and_strictly_increasing() {
        let a = ServerInstance::new("a", 1, 2);
        let stages: Vec<_> = (0..4).map(|_| stage(&[(&a, vec![0])])).collect();

        let request =
            assemble_request(&a, &stages, &infos(4), b"{}", PLAN_VERSION_V1).unwrap();
        let stage_ids: Vec<i32> = request
            .stage_plans
            .iter()
            .map(|p| p.stage_metadata.stage_id)
            .collect();
        assert_eq!(stage_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn projects_workers_in_assignment_order() {
        let a = ServerInstance::new("a", 1, 2);
        let stages = vec![stage(&[(&a, vec![2, 0])])];

        let request =
            assemble_request(&a, &stages, &infos(1), b"{}", PLAN_VERSION_V1).unwrap();
        let worker_ids: Vec<u32> = request.stage_plans[0]
            .stage_metadata
            .worker_metadata
            .iter()
            .map(|w| w.worker_id)
            .collect();
        assert_eq!(worker_ids, vec![2, 0]);
    }

    #[test]
    fn invalid_worker_id_is_an_invariant_error() {
        let a = ServerInstance::new("a", 1, 2);
        let mut bad = stage(&[(&a, vec![0])]);
        bad.server_to_worker_ids.insert(a.clone(), vec![9]);

        let err = assemble_request(&a, &[bad], &infos(1), b"{}", PLAN_VERSION_V1).unwrap_err();
        assert_eq!(err.kind(), "InvariantError");
    }

    #[test]
    fn reserved_metadata_keys_win_over_user_options() {
        let mut query_options = BTreeMap::new();
        query_options.insert("requestId".to_string(), "spoofed".to_string());
        query_options.insert("timeoutMs".to_string(), "999999999".to_string());
        query_options.insert("useColocatedJoin".to_string(), "true".to_string());

        let deadline = Deadline::after_millis(5_000);
        let metadata = prepare_request_metadata(RequestId(42), &query_options, &deadline);

        assert_eq!(metadata.get("requestId").map(String::as_str), Some("42"));
        let timeout_ms: u64 = metadata.get("timeoutMs").unwrap().parse().unwrap();
        assert!(timeout_ms <= 5_000);
        assert!(timeout_ms > 0);
        assert_eq!(
            metadata.get("useColocatedJoin").map(String::as_str),
            Some("true")
        );
    }
}
