//! gRPC transport implementation of the dispatch client contracts.
//!
//! RPC schema source: `proto/msq_worker.proto`.
//!
//! Channels are created lazily: the pool hands out clients immediately and
//! the first RPC establishes the connection. Per-RPC deadlines propagate the
//! request's remaining wall-clock budget via `grpc-timeout`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};

use msq_common::deadline::Deadline;
use msq_common::error::{MsqError, Result};
use msq_common::ids::RequestId;
use msq_planner::routing::{ServerInstance, WorkerMetadata};

use crate::client::{DispatchTransport, TimeSeriesTransport, TransportFactory};
use crate::request::{
    ExplainResponse, QueryRequest, QueryResponse, StagePlan, TimeSeriesQueryRequest,
    TimeSeriesResponse, WireStageMetadata,
};

#[allow(missing_docs)]
pub mod v1 {
    tonic::include_proto!("msq.worker.v1");
}

pub use v1::query_server_client::QueryServerClient;
pub use v1::query_server_server::{QueryServer, QueryServerServer};
pub use v1::time_series_server_client::TimeSeriesServerClient;
pub use v1::time_series_server_server::{TimeSeriesServer, TimeSeriesServerServer};

/// Query-service client over one lazily-connected channel.
#[derive(Debug, Clone)]
pub struct GrpcDispatchTransport {
    client: QueryServerClient<Channel>,
}

impl GrpcDispatchTransport {
    /// Client for `hostname:port`; the channel connects on first use.
    pub fn connect_lazy(hostname: &str, port: u16) -> Result<Self> {
        let channel = lazy_channel(hostname, port)?;
        Ok(Self {
            client: QueryServerClient::new(channel),
        })
    }
}

#[async_trait]
impl DispatchTransport for GrpcDispatchTransport {
    async fn submit(&self, request: QueryRequest, deadline: Deadline) -> Result<QueryResponse> {
        let mut client = self.client.clone();
        let mut grpc_request = tonic::Request::new(to_proto_query_request(request));
        grpc_request.set_timeout(deadline.remaining());
        let response = client.submit(grpc_request).await.map_err(map_status)?;
        Ok(QueryResponse {
            metadata: response.into_inner().metadata,
        })
    }

    async fn explain(
        &self,
        request: QueryRequest,
        deadline: Deadline,
    ) -> Result<Vec<ExplainResponse>> {
        let mut client = self.client.clone();
        let mut grpc_request = tonic::Request::new(to_proto_query_request(request));
        grpc_request.set_timeout(deadline.remaining());
        let mut stream = client
            .explain(grpc_request)
            .await
            .map_err(map_status)?
            .into_inner();
        let mut responses = Vec::new();
        while let Some(item) = stream.message().await.map_err(map_status)? {
            responses.push(from_proto_explain_response(item)?);
        }
        Ok(responses)
    }

    async fn cancel(&self, request_id: RequestId) -> Result<()> {
        let mut client = self.client.clone();
        client
            .cancel(tonic::Request::new(v1::CancelRequest {
                request_id: request_id.0,
            }))
            .await
            .map_err(map_status)?;
        Ok(())
    }
}

/// Time-series client over one lazily-connected channel.
#[derive(Debug, Clone)]
pub struct GrpcTimeSeriesTransport {
    client: TimeSeriesServerClient<Channel>,
}

impl GrpcTimeSeriesTransport {
    /// Client for `hostname:port`; the channel connects on first use.
    pub fn connect_lazy(hostname: &str, port: u16) -> Result<Self> {
        let channel = lazy_channel(hostname, port)?;
        Ok(Self {
            client: TimeSeriesServerClient::new(channel),
        })
    }
}

#[async_trait]
impl TimeSeriesTransport for GrpcTimeSeriesTransport {
    async fn submit(
        &self,
        request: TimeSeriesQueryRequest,
        deadline: Deadline,
    ) -> Result<TimeSeriesResponse> {
        let mut client = self.client.clone();
        let mut grpc_request = tonic::Request::new(v1::TimeSeriesQueryRequest {
            dispatch_plan: request.dispatch_plan,
            metadata: request.metadata.into_iter().collect(),
        });
        grpc_request.set_timeout(deadline.remaining());
        let response = client.submit(grpc_request).await.map_err(map_status)?;
        let response = response.into_inner();
        Ok(TimeSeriesResponse {
            payload: response.payload,
            metadata: response.metadata,
        })
    }
}

/// Builds gRPC-backed transports for the dispatcher's client pools.
#[derive(Debug, Default)]
pub struct GrpcTransportFactory;

impl TransportFactory for GrpcTransportFactory {
    fn create_dispatch_transport(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<dyn DispatchTransport>> {
        Ok(Arc::new(GrpcDispatchTransport::connect_lazy(hostname, port)?))
    }

    fn create_time_series_transport(
        &self,
        hostname: &str,
        port: u16,
    ) -> Result<Arc<dyn TimeSeriesTransport>> {
        Ok(Arc::new(GrpcTimeSeriesTransport::connect_lazy(
            hostname, port,
        )?))
    }
}

fn lazy_channel(hostname: &str, port: u16) -> Result<Channel> {
    let endpoint = Endpoint::from_shared(format!("http://{hostname}:{port}"))
        .map_err(|e| MsqError::Transport(format!("invalid endpoint {hostname}:{port}: {e}")))?;
    Ok(endpoint.connect_lazy())
}

fn map_status(status: tonic::Status) -> MsqError {
    MsqError::Transport(status.to_string())
}

fn to_proto_query_request(request: QueryRequest) -> v1::QueryRequest {
    v1::QueryRequest {
        version: request.version,
        stage_plan: request.stage_plans.into_iter().map(to_proto_stage_plan).collect(),
        metadata: request.metadata,
    }
}

fn to_proto_stage_plan(stage_plan: StagePlan) -> v1::StagePlan {
    v1::StagePlan {
        root_node: stage_plan.root_node,
        stage_metadata: Some(v1::StageMetadata {
            stage_id: stage_plan.stage_metadata.stage_id,
            worker_metadata: stage_plan
                .stage_metadata
                .worker_metadata
                .into_iter()
                .map(to_proto_worker_metadata)
                .collect(),
            custom_property: stage_plan.stage_metadata.custom_property,
        }),
    }
}

fn to_proto_worker_metadata(worker: WorkerMetadata) -> v1::WorkerMetadata {
    v1::WorkerMetadata {
        worker_id: worker.worker_id,
        hostname: worker.server.hostname,
        query_service_port: u32::from(worker.server.query_service_port),
        query_mailbox_port: u32::from(worker.server.query_mailbox_port),
        custom_properties: worker.custom_properties.into_iter().collect(),
    }
}

fn from_proto_explain_response(response: v1::ExplainResponse) -> Result<ExplainResponse> {
    let mut stage_plans = Vec::with_capacity(response.stage_plan.len());
    for stage_plan in response.stage_plan {
        stage_plans.push(from_proto_stage_plan(stage_plan)?);
    }
    Ok(ExplainResponse {
        stage_plans,
        metadata: response.metadata,
    })
}

fn from_proto_stage_plan(stage_plan: v1::StagePlan) -> Result<StagePlan> {
    let stage_metadata = stage_plan
        .stage_metadata
        .ok_or_else(|| MsqError::Transport("stage plan misses stage metadata".to_string()))?;
    let mut worker_metadata = Vec::with_capacity(stage_metadata.worker_metadata.len());
    for worker in stage_metadata.worker_metadata {
        worker_metadata.push(from_proto_worker_metadata(worker)?);
    }
    Ok(StagePlan {
        root_node: stage_plan.root_node,
        stage_metadata: WireStageMetadata {
            stage_id: stage_metadata.stage_id,
            worker_metadata,
            custom_property: stage_metadata.custom_property,
        },
    })
}

fn from_proto_worker_metadata(worker: v1::WorkerMetadata) -> Result<WorkerMetadata> {
    let query_service_port = u16::try_from(worker.query_service_port)
        .map_err(|_| MsqError::Transport(format!("invalid port {}", worker.query_service_port)))?;
    let query_mailbox_port = u16::try_from(worker.query_mailbox_port)
        .map_err(|_| MsqError::Transport(format!("invalid port {}", worker.query_mailbox_port)))?;
    Ok(WorkerMetadata {
        worker_id: worker.worker_id,
        server: ServerInstance::new(worker.hostname, query_service_port, query_mailbox_port),
        custom_properties: worker.custom_properties.into_iter().collect::<BTreeMap<_, _>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn stage_plan_round_trips_through_proto() {
        let stage_plan = StagePlan {
            root_node: vec![1, 2, 3],
            stage_metadata: WireStageMetadata {
                stage_id: 2,
                worker_metadata: vec![WorkerMetadata {
                    worker_id: 4,
                    server: ServerInstance::new("host-1", 8442, 8421),
                    custom_properties: BTreeMap::from([(
                        "mailbox".to_string(),
                        "host-1:8421|4".to_string(),
                    )]),
                }],
                custom_property: vec![9],
            },
        };

        let round_tripped = from_proto_stage_plan(to_proto_stage_plan(stage_plan.clone())).unwrap();
        assert_eq!(round_tripped, stage_plan);
    }
}
