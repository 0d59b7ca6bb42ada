//! Orchestrates submit/explain/time-series dispatch and the local reduce.
//!
//! Responsibilities:
//! - serialize stage plans off the dispatch thread, bounded by the request
//!   deadline;
//! - fan per-server requests out in parallel and drain their responses
//!   through a bounded callback queue, surfacing the first error;
//! - run the stage-0 reduce against the local mailbox, projecting and
//!   externalizing values to the declared result schema;
//! - on any failure along the chain, best-effort cancel every server named
//!   by a remote stage and rethrow.
//!
//! Failure semantics:
//! - the first observed per-server error short-circuits the drain; responses
//!   still in flight are discarded when the request context dies;
//! - cancel is fire-and-forget and never awaited; cancel failures are logged
//!   and swallowed.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use msq_common::deadline::Deadline;
use msq_common::error::{MsqError, Result};
use msq_common::ids::RequestId;
use msq_common::metrics::global_metrics;
use msq_common::options;
use msq_common::schema::{DataSchema, ResultTable, Value};
use msq_planner::plan_node::PlanNode;
use msq_planner::routing::{ServerInstance, StageMetadata};
use msq_planner::serde_util::{
    deserialize_plan_node, serialize_plan_node, serialize_properties,
};
use msq_planner::subplan::{DispatchableStagePlan, DispatchableSubPlan};
use msq_runtime::mailbox::MailboxService;
use msq_runtime::operator::{MailboxReceiveOperator, OpChainExecutionContext};
use msq_runtime::stats::{ClosedStageStats, MultiStageQueryStats};
use msq_runtime::DataBlock;

use crate::client::{
    AsyncDispatchResponse, ClientPool, DispatchTransport, TimeSeriesTransport, TransportFactory,
};
use crate::request::{
    assemble_request, prepare_request_metadata, ExplainResponse, QueryRequest, QueryResponse,
    SerializedStageInfo,
};

/// Dispatcher behavior/configuration knobs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrent plan-serialization slots.
    pub serializer_slots: usize,
    /// Wire protocol version stamped on every stage-plan request.
    pub plan_version: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            serializer_slots: 2 * std::thread::available_parallelism().map_or(1, usize::from),
            plan_version: options::PLAN_VERSION_V1,
        }
    }
}

/// Tabular result of one multi-stage query plus its per-stage statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Projected, externalized result rows.
    pub result_table: ResultTable,
    /// Per-stage statistics; index 0 is the closed local reduce stage,
    /// index i>0 the stats streamed down from stage i.
    pub stage_stats: Vec<ClosedStageStats>,
    /// Wall time the broker spent draining the reduce mailbox.
    pub broker_reduce_time_ms: u64,
}

impl QueryResult {
    fn from_stats(
        result_table: ResultTable,
        query_stats: MultiStageQueryStats,
        broker_reduce_time_ms: u64,
    ) -> Result<Self> {
        if query_stats.current_stage_id != 0 {
            return Err(MsqError::Invariant(format!(
                "expecting query stats for stage 0, got: {}",
                query_stats.current_stage_id
            )));
        }
        let max_stage_id = query_stats.max_stage_id();
        let mut stage_stats = Vec::with_capacity(max_stage_id as usize + 1);
        stage_stats.push(query_stats.current.clone().close());
        for stage_id in 1..=max_stage_id {
            stage_stats.push(query_stats.upstream_stage_stats(stage_id)?.clone());
        }
        Ok(Self {
            result_table,
            stage_stats,
            broker_reduce_time_ms,
        })
    }
}

/// Broker-side dispatcher for multi-stage queries.
///
/// Owns the two persistent client pools and the serializer slot pool;
/// release both through [`QueryDispatcher::shutdown`].
pub struct QueryDispatcher {
    pub(crate) config: DispatcherConfig,
    pub(crate) mailbox_service: Arc<dyn MailboxService>,
    pub(crate) transport_factory: Arc<dyn TransportFactory>,
    pub(crate) dispatch_clients: ClientPool<dyn DispatchTransport>,
    pub(crate) time_series_clients: ClientPool<dyn TimeSeriesTransport>,
    pub(crate) serializer_slots: Arc<Semaphore>,
}

impl QueryDispatcher {
    /// Dispatcher with default configuration.
    pub fn new(
        mailbox_service: Arc<dyn MailboxService>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self::with_config(DispatcherConfig::default(), mailbox_service, transport_factory)
    }

    /// Dispatcher with explicit configuration.
    pub fn with_config(
        config: DispatcherConfig,
        mailbox_service: Arc<dyn MailboxService>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let slots = config.serializer_slots.max(1);
        Self {
            config,
            mailbox_service,
            transport_factory,
            dispatch_clients: ClientPool::new(),
            time_series_clients: ClientPool::new(),
            serializer_slots: Arc::new(Semaphore::new(slots)),
        }
    }

    /// Fan out stages 1..N, then drain the local reduce stage into a
    /// [`QueryResult`]. On any failure along the chain, best-effort cancel
    /// every involved worker and rethrow.
    pub async fn submit_and_reduce(
        &self,
        request_id: RequestId,
        sub_plan: &DispatchableSubPlan,
        timeout_ms: u64,
        query_options: &BTreeMap<String, String>,
    ) -> Result<QueryResult> {
        global_metrics().record_dispatch("submit");
        let result = async {
            self.submit(request_id, sub_plan, timeout_ms, query_options)
                .await?;
            Self::run_reducer(
                &self.mailbox_service,
                request_id,
                sub_plan,
                timeout_ms,
                query_options,
            )
            .await
        }
        .await;
        match result {
            Ok(query_result) => Ok(query_result),
            Err(e) => {
                global_metrics().record_dispatch_error("submit");
                self.cancel(request_id, &sub_plan.stage_plans);
                Err(e)
            }
        }
    }

    /// Fan a single stage plan out with the explain sender and decode the
    /// plan trees every worker reports back.
    pub async fn explain(
        &self,
        request_id: RequestId,
        fragment: &DispatchableStagePlan,
        timeout_ms: u64,
        query_options: &BTreeMap<String, String>,
    ) -> Result<Vec<PlanNode>> {
        global_metrics().record_dispatch("explain");
        let mut plan_nodes = Vec::new();
        let stage_plans = std::slice::from_ref(fragment);
        let result = self
            .execute(
                request_id,
                stage_plans,
                timeout_ms,
                query_options,
                |client, request, deadline| async move { client.explain(request, deadline).await },
                |responses: Vec<ExplainResponse>, server: &ServerInstance| {
                    for response in responses {
                        if let Some(message) = response.metadata.get(options::response::STATUS_ERROR)
                        {
                            return Err(MsqError::Explain {
                                request_id,
                                server: server.to_string(),
                                message: message.clone(),
                            });
                        }
                        for stage_plan in &response.stage_plans {
                            let node =
                                deserialize_plan_node(&stage_plan.root_node).map_err(|e| {
                                    MsqError::Explain {
                                        request_id,
                                        server: server.to_string(),
                                        message: format!("failed to parse explain plan node: {e}"),
                                    }
                                })?;
                            plan_nodes.push(node);
                        }
                    }
                    Ok(())
                },
            )
            .await;
        if let Err(e) = result {
            global_metrics().record_dispatch_error("explain");
            self.cancel(request_id, stage_plans);
            return Err(e);
        }
        Ok(plan_nodes)
    }

    /// Release the client pools, the mailbox service, and the serializer
    /// slot pool.
    pub fn shutdown(&self) {
        self.dispatch_clients.shutdown_all(|client| client.shutdown());
        self.time_series_clients.shutdown_all(|client| client.shutdown());
        self.mailbox_service.shutdown();
        self.serializer_slots.close();
    }

    pub(crate) async fn submit(
        &self,
        request_id: RequestId,
        sub_plan: &DispatchableSubPlan,
        timeout_ms: u64,
        query_options: &BTreeMap<String, String>,
    ) -> Result<()> {
        if sub_plan.stage_plans.is_empty() {
            return Err(MsqError::Invariant("sub-plan has no stages".to_string()));
        }
        // Stage 0 is the local reduce stage and is never shipped.
        let remote_stages = &sub_plan.stage_plans[1..];
        self.execute(
            request_id,
            remote_stages,
            timeout_ms,
            query_options,
            |client, request, deadline| async move { client.submit(request, deadline).await },
            |response: QueryResponse, server: &ServerInstance| {
                if let Some(message) = response.metadata.get(options::response::STATUS_ERROR) {
                    return Err(MsqError::Dispatch {
                        request_id,
                        server: server.to_string(),
                        message: message.clone(),
                    });
                }
                Ok(())
            },
        )
        .await
    }

    /// Fan-out core shared by submit and explain.
    ///
    /// Serializes the given stages, assembles one request per participating
    /// server, sends them all in parallel, and drains the bounded callback
    /// queue until every server responded or the deadline expired. The
    /// consumer runs serially on the drain task, in arrival order.
    async fn execute<E, S, Fut, C>(
        &self,
        request_id: RequestId,
        stage_plans: &[DispatchableStagePlan],
        timeout_ms: u64,
        query_options: &BTreeMap<String, String>,
        send: S,
        mut consume: C,
    ) -> Result<()>
    where
        E: Send + 'static,
        S: Fn(Arc<dyn DispatchTransport>, QueryRequest, Deadline) -> Fut,
        Fut: Future<Output = Result<E>> + Send + 'static,
        C: FnMut(E, &ServerInstance) -> Result<()>,
    {
        let deadline = Deadline::after_millis(timeout_ms);

        let mut servers = HashSet::new();
        let stage_infos = self
            .serialize_plan_fragments(stage_plans, &mut servers, &deadline)
            .await?;

        let request_metadata = prepare_request_metadata(request_id, query_options, &deadline);
        let request_metadata_bytes = serialize_properties(&request_metadata)?;

        let num_servers = servers.len();
        if num_servers == 0 {
            return Ok(());
        }
        debug!(request_id = %request_id, num_servers, "dispatching query to servers");

        // Capacity covers one response per server, so callbacks never block.
        let (callback_tx, mut callback_rx) =
            mpsc::channel::<AsyncDispatchResponse<E>>(num_servers);
        for server in &servers {
            match self.prepare_send(server, stage_plans, &stage_infos, &request_metadata_bytes) {
                Ok((client, request)) => {
                    let fut = send(client, request, deadline);
                    let callback = callback_tx.clone();
                    let server = server.clone();
                    tokio::spawn(async move {
                        let result = fut.await;
                        let response = AsyncDispatchResponse {
                            server: server.clone(),
                            result,
                        };
                        if callback.try_send(response).is_err() {
                            warn!(
                                request_id = %request_id,
                                server = %server,
                                "failed to offer response to dispatch callback queue"
                            );
                        }
                    });
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        server = %server,
                        error = %e,
                        "caught exception while dispatching query"
                    );
                    let response = AsyncDispatchResponse {
                        server: server.clone(),
                        result: Err(e),
                    };
                    if callback_tx.try_send(response).is_err() {
                        warn!(
                            request_id = %request_id,
                            server = %server,
                            "failed to offer response to dispatch callback queue"
                        );
                    }
                }
            }
        }
        drop(callback_tx);

        let mut num_success = 0usize;
        while num_success < num_servers && !deadline.is_expired() {
            let received =
                match tokio::time::timeout_at(deadline.expires_at(), callback_rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => break,
                };
            let Some(response) = received else {
                return Err(MsqError::Invariant(
                    "dispatch callback queue closed before all responses arrived".to_string(),
                ));
            };
            match response.result {
                Ok(value) => {
                    consume(value, &response.server)?;
                    num_success += 1;
                }
                Err(e) => {
                    return Err(MsqError::Dispatch {
                        request_id,
                        server: response.server.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if num_success < num_servers {
            return Err(MsqError::Timeout(format!(
                "timed out waiting for response of async query-dispatch for request {request_id}"
            )));
        }
        Ok(())
    }

    fn prepare_send(
        &self,
        server: &ServerInstance,
        stage_plans: &[DispatchableStagePlan],
        stage_infos: &[SerializedStageInfo],
        request_metadata: &[u8],
    ) -> Result<(Arc<dyn DispatchTransport>, QueryRequest)> {
        let request = assemble_request(
            server,
            stage_plans,
            stage_infos,
            request_metadata,
            self.config.plan_version,
        )?;
        let client = self.dispatch_clients.get_or_create(server, |host, port| {
            self.transport_factory.create_dispatch_transport(host, port)
        })?;
        Ok((client, request))
    }

    /// Serialize every stage plan on the slot-bounded blocking pool, waiting
    /// for the results in stage order under the remaining deadline.
    ///
    /// Side effect: accumulates the union of participating servers into
    /// `servers` before any request assembly starts.
    async fn serialize_plan_fragments(
        &self,
        stage_plans: &[DispatchableStagePlan],
        servers: &mut HashSet<ServerInstance>,
        deadline: &Deadline,
    ) -> Result<Vec<SerializedStageInfo>> {
        let started = Instant::now();
        let mut handles = Vec::with_capacity(stage_plans.len());
        for stage_plan in stage_plans {
            servers.extend(stage_plan.server_to_worker_ids.keys().cloned());
            let slots = Arc::clone(&self.serializer_slots);
            let root = stage_plan.root.clone();
            let custom_properties = stage_plan.custom_properties.clone();
            handles.push(tokio::spawn(async move {
                let _permit = slots.acquire_owned().await.map_err(|_| {
                    MsqError::Invariant("serializer pool is shut down".to_string())
                })?;
                tokio::task::spawn_blocking(move || {
                    serialize_stage_plan(&root, &custom_properties)
                })
                .await
                .map_err(|e| MsqError::Invariant(format!("serialization task failed: {e}")))?
            }));
        }

        let mut stage_infos = Vec::with_capacity(handles.len());
        let mut failure = None;
        for (index, handle) in handles.iter_mut().enumerate() {
            match tokio::time::timeout_at(deadline.expires_at(), &mut *handle).await {
                Err(_) => {
                    failure = Some(MsqError::Timeout(format!(
                        "timed out serializing stage plan at index {index}"
                    )));
                    break;
                }
                Ok(Err(join_error)) => {
                    failure = Some(MsqError::Invariant(format!(
                        "serialization task failed: {join_error}"
                    )));
                    break;
                }
                Ok(Ok(Err(e))) => {
                    failure = Some(e);
                    break;
                }
                Ok(Ok(Ok(info))) => stage_infos.push(info),
            }
        }
        if let Some(error) = failure {
            for handle in &handles {
                handle.abort();
            }
            return Err(error);
        }
        global_metrics().observe_plan_serialize_seconds(started.elapsed().as_secs_f64());
        Ok(stage_infos)
    }

    /// Best-effort cancel on every server named by a non-reduce stage.
    ///
    /// Cancels are not awaited and never fail the caller.
    pub(crate) fn cancel(&self, request_id: RequestId, stage_plans: &[DispatchableStagePlan]) {
        // Skip the reduce stage (stage 0).
        let mut servers_to_cancel = HashSet::new();
        for stage_plan in stage_plans.iter().skip(1) {
            servers_to_cancel.extend(stage_plan.server_to_worker_ids.keys().cloned());
        }
        for server in servers_to_cancel {
            let client = match self.dispatch_clients.get_or_create(&server, |host, port| {
                self.transport_factory.create_dispatch_transport(host, port)
            }) {
                Ok(client) => client,
                Err(e) => {
                    global_metrics().record_cancel("failed");
                    warn!(
                        request_id = %request_id,
                        server = %server,
                        error = %e,
                        "caught exception while cancelling query"
                    );
                    continue;
                }
            };
            tokio::spawn(async move {
                match client.cancel(request_id).await {
                    Ok(()) => global_metrics().record_cancel("sent"),
                    Err(e) => {
                        global_metrics().record_cancel("failed");
                        warn!(
                            request_id = %request_id,
                            server = %server,
                            error = %e,
                            "caught exception while cancelling query"
                        );
                    }
                }
            });
        }
    }

    /// Drain the stage-0 mailbox into the declared result schema.
    ///
    /// Opens a receive operator for the reduce stage and pulls typed blocks
    /// until end-of-stream, projecting each raw row through the sub-plan's
    /// result fields and externalizing values per column type.
    pub async fn run_reducer(
        mailbox_service: &Arc<dyn MailboxService>,
        request_id: RequestId,
        sub_plan: &DispatchableSubPlan,
        timeout_ms: u64,
        query_options: &BTreeMap<String, String>,
    ) -> Result<QueryResult> {
        let started = Instant::now();
        let deadline = Deadline::after_millis(timeout_ms);

        // The reduce stage is always stage 0.
        let stage_plan = sub_plan
            .stage_plans
            .first()
            .ok_or_else(|| MsqError::Invariant("sub-plan has no reduce stage".to_string()))?;
        let PlanNode::MailboxReceive(receive_node) = &stage_plan.root else {
            return Err(MsqError::Invariant(format!(
                "expecting mailbox receive node as root of reduce stage, got: {}",
                stage_plan.root.name()
            )));
        };
        if stage_plan.worker_metadata.len() != 1 {
            return Err(MsqError::Invariant(format!(
                "expecting single worker for reduce stage, got: {}",
                stage_plan.worker_metadata.len()
            )));
        }
        let stage_metadata = StageMetadata {
            stage_id: 0,
            workers: stage_plan.worker_metadata.clone(),
            custom_properties: stage_plan.custom_properties.clone(),
        };
        let ctx = OpChainExecutionContext {
            request_id,
            deadline,
            query_options: query_options.clone(),
            stage_metadata,
            worker_metadata: stage_plan.worker_metadata[0].clone(),
            parent_span: tracing::Span::current(),
        };

        let source_schema = &receive_node.data_schema;
        let num_columns = sub_plan.result_fields.len();
        let mut column_names = Vec::with_capacity(num_columns);
        let mut column_types = Vec::with_capacity(num_columns);
        for field in &sub_plan.result_fields {
            let column_type =
                source_schema
                    .column_types
                    .get(field.source_index)
                    .ok_or_else(|| {
                        MsqError::Invariant(format!(
                            "result field {} references column {} outside the source schema",
                            field.name, field.source_index
                        ))
                    })?;
            column_names.push(field.name.clone());
            column_types.push(*column_type);
        }
        let result_schema = DataSchema::new(column_names, column_types)?;

        let mut operator = MailboxReceiveOperator::new(mailbox_service, &ctx, receive_node)?;
        let mut result_rows = Vec::new();
        let terminal = loop {
            let block = operator.next_block().await?;
            if block.is_end_of_stream() {
                break block;
            }
            for raw_row in block.rows() {
                let mut row = Vec::with_capacity(num_columns);
                for (i, field) in sub_plan.result_fields.iter().enumerate() {
                    let raw = raw_row.get(field.source_index).ok_or_else(|| {
                        MsqError::Invariant(format!(
                            "raw row of width {} misses source column {}",
                            raw_row.len(),
                            field.source_index
                        ))
                    })?;
                    if raw.is_null() {
                        row.push(Value::Null);
                    } else {
                        let column_type = result_schema.column_types[i];
                        row.push(column_type.format(column_type.to_external(raw.clone())?));
                    }
                }
                result_rows.push(row);
            }
        };

        let query_stats = match terminal {
            DataBlock::Error(exceptions) => return Err(MsqError::Reduce(exceptions)),
            DataBlock::Eos(stats) => stats,
            DataBlock::Rows(_) => {
                return Err(MsqError::Invariant(
                    "reduce loop terminated on a non-terminal block".to_string(),
                ));
            }
        };

        let broker_reduce_time_ms = started.elapsed().as_millis() as u64;
        global_metrics().observe_broker_reduce_seconds(started.elapsed().as_secs_f64());
        QueryResult::from_stats(
            ResultTable {
                data_schema: result_schema,
                rows: result_rows,
            },
            query_stats,
            broker_reduce_time_ms,
        )
    }
}

fn serialize_stage_plan(
    root: &PlanNode,
    custom_properties: &BTreeMap<String, String>,
) -> Result<SerializedStageInfo> {
    Ok(SerializedStageInfo {
        root_node: serialize_plan_node(root)?,
        custom_property: serialize_properties(custom_properties)?,
    })
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod dispatcher_tests;
