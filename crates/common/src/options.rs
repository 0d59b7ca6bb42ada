//! Metadata keys and protocol constants shared with worker servers.

/// Wire protocol version stamped on every stage-plan request.
pub const PLAN_VERSION_V1: i32 = 1;

/// Request-metadata keys attached to every fan-out request.
pub mod request {
    /// Request id, as a decimal string.
    pub const REQUEST_ID: &str = "requestId";
    /// Remaining deadline at assembly time, as decimal milliseconds.
    pub const TIMEOUT_MS: &str = "timeoutMs";
}

/// Response-metadata keys workers may attach.
pub mod response {
    /// Present iff the worker failed; value is the failure message.
    pub const STATUS_ERROR: &str = "ERROR";
}

/// Metadata keys for the time-series request/response exchange.
pub mod time_series {
    /// Query language of the serialized plan.
    pub const LANGUAGE: &str = "language";
    /// Window start, epoch seconds.
    pub const START_TIME_SECONDS: &str = "startTimeSeconds";
    /// Bucket width, seconds.
    pub const WINDOW_SECONDS: &str = "windowSeconds";
    /// Number of buckets in the window.
    pub const NUM_ELEMENTS: &str = "numElements";
    /// Request id, as a decimal string.
    pub const REQUEST_ID: &str = "requestId";
    /// Response-side error classification.
    pub const ERROR_TYPE: &str = "errorType";
    /// Response-side error message; presence marks the response failed.
    pub const ERROR_MESSAGE: &str = "errorMessage";

    const SEGMENT_LIST_PREFIX: &str = "segmentList:";

    /// Request-metadata key carrying the segment CSV for one plan fragment.
    pub fn encode_segment_list_key(plan_id: &str) -> String {
        format!("{SEGMENT_LIST_PREFIX}{plan_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::time_series::encode_segment_list_key;

    #[test]
    fn segment_list_key_embeds_plan_id() {
        assert_eq!(encode_segment_list_key("agg_0"), "segmentList:agg_0");
    }
}
