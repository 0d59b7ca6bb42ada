//! Single-server time-series dispatch.
//!
//! Unlike the multi-stage path, failures here never propagate as errors:
//! every outcome (timeout, transport failure, worker-flagged error, payload
//! decode failure) folds into a structured [`BrokerTimeSeriesResponse`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use msq_common::deadline::Deadline;
use msq_common::error::Result;
use msq_common::ids::RequestId;
use msq_common::metrics::global_metrics;
use msq_common::options::time_series as keys;
use msq_planner::subplan::TimeSeriesDispatchablePlan;

use crate::client::AsyncDispatchResponse;
use crate::dispatcher::QueryDispatcher;
use crate::request::TimeSeriesQueryRequest;

const RESPONSE_QUEUE_CAPACITY: usize = 10;

const STATUS_SUCCESS: &str = "success";
const STATUS_ERROR: &str = "error";

/// Broker-shaped time-series response returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerTimeSeriesResponse {
    /// `"success"` or `"error"`.
    pub status: String,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Error classification on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BrokerTimeSeriesResponse {
    /// Successful response wrapping a result payload.
    pub fn new_success(data: serde_json::Value) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            data,
            error_type: None,
            error_message: None,
        }
    }

    /// Failed response with an error classification and message.
    pub fn new_error(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            data: serde_json::Value::Null,
            error_type: Some(error_type.into()),
            error_message: Some(error_message.into()),
        }
    }

    /// Whether this response reports a failure.
    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }
}

impl QueryDispatcher {
    /// Submit a time-series plan to its one addressed server and translate
    /// the outcome into a broker response. Never returns an error.
    pub async fn submit_and_get(
        &self,
        request_id: RequestId,
        plan: &TimeSeriesDispatchablePlan,
        timeout_ms: u64,
    ) -> BrokerTimeSeriesResponse {
        global_metrics().record_dispatch("timeseries");
        let response = self.submit_and_get_inner(request_id, plan, timeout_ms).await;
        if response.is_error() {
            global_metrics().record_dispatch_error("timeseries");
        }
        response
    }

    async fn submit_and_get_inner(
        &self,
        request_id: RequestId,
        plan: &TimeSeriesDispatchablePlan,
        timeout_ms: u64,
    ) -> BrokerTimeSeriesResponse {
        let deadline = Deadline::after_millis(timeout_ms);
        let (callback_tx, mut callback_rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);
        if let Err(e) = self.submit_time_series(request_id, plan, deadline, callback_tx) {
            return BrokerTimeSeriesResponse::new_error(e.kind(), e.to_string());
        }

        let received =
            match tokio::time::timeout_at(deadline.expires_at(), callback_rx.recv()).await {
                Err(_) => {
                    return BrokerTimeSeriesResponse::new_error(
                        "TimeoutException",
                        "Timed out waiting for response",
                    );
                }
                Ok(received) => received,
            };
        let Some(AsyncDispatchResponse { result, .. }) = received else {
            return BrokerTimeSeriesResponse::new_error(
                "NullResponse",
                "Received null response from server",
            );
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => return BrokerTimeSeriesResponse::new_error(e.kind(), e.to_string()),
        };

        if let Some(message) = response.metadata.get(keys::ERROR_MESSAGE) {
            let error_type = response
                .metadata
                .get(keys::ERROR_TYPE)
                .cloned()
                .unwrap_or_else(|| "unknown error-type".to_string());
            return BrokerTimeSeriesResponse::new_error(error_type, message.clone());
        }

        match serde_json::from_slice::<BrokerTimeSeriesResponse>(&response.payload) {
            Ok(parsed) => parsed,
            Err(e) => BrokerTimeSeriesResponse::new_error(
                "SerdeError",
                format!("failed to parse time-series payload: {e}"),
            ),
        }
    }

    fn submit_time_series(
        &self,
        request_id: RequestId,
        plan: &TimeSeriesDispatchablePlan,
        deadline: Deadline,
        callback: mpsc::Sender<AsyncDispatchResponse<crate::request::TimeSeriesResponse>>,
    ) -> Result<()> {
        let mut metadata = initialize_time_series_metadata_map(plan);
        metadata.insert(keys::REQUEST_ID.to_string(), request_id.to_string());
        let request = TimeSeriesQueryRequest {
            dispatch_plan: plan.serialized_plan.as_bytes().to_vec(),
            metadata,
        };

        let client = self.time_series_clients.get_or_create(&plan.server, |host, port| {
            self.transport_factory.create_time_series_transport(host, port)
        })?;
        let server = plan.server.clone();
        tokio::spawn(async move {
            let result = client.submit(request, deadline).await;
            let response = AsyncDispatchResponse {
                server: server.clone(),
                result,
            };
            if callback.try_send(response).is_err() {
                warn!(
                    request_id = %request_id,
                    server = %server,
                    "failed to offer time-series response to callback queue"
                );
            }
        });
        Ok(())
    }
}

/// Request-metadata map for a time-series plan: language, window shape, and
/// one `segmentList:<planId>` CSV entry per fragment.
pub(crate) fn initialize_time_series_metadata_map(
    plan: &TimeSeriesDispatchablePlan,
) -> std::collections::BTreeMap<String, String> {
    let mut metadata = std::collections::BTreeMap::new();
    metadata.insert(keys::LANGUAGE.to_string(), plan.language.clone());
    metadata.insert(
        keys::START_TIME_SECONDS.to_string(),
        plan.time_buckets.start_seconds.to_string(),
    );
    metadata.insert(
        keys::WINDOW_SECONDS.to_string(),
        plan.time_buckets.bucket_seconds.to_string(),
    );
    metadata.insert(
        keys::NUM_ELEMENTS.to_string(),
        plan.time_buckets.num_buckets.to_string(),
    );
    for (plan_id, segments) in &plan.plan_id_to_segments {
        metadata.insert(keys::encode_segment_list_key(plan_id), segments.join(","));
    }
    metadata
}
