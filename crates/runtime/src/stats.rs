//! Per-stage execution statistics carried by end-of-stream blocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use msq_common::error::{MsqError, Result};

/// Open (still accumulating) statistics of one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Blocks emitted by the stage.
    pub num_blocks: u64,
    /// Rows emitted by the stage.
    pub num_rows: u64,
    /// Wall time the stage spent executing, milliseconds.
    pub execution_time_ms: u64,
}

impl StageStats {
    /// Record one emitted block.
    pub fn record_block(&mut self, num_rows: u64) {
        self.num_blocks += 1;
        self.num_rows += num_rows;
    }

    /// Add execution wall time.
    pub fn add_execution_time_ms(&mut self, millis: u64) {
        self.execution_time_ms += millis;
    }

    /// Freeze into the closed, immutable form.
    pub fn close(self) -> ClosedStageStats {
        ClosedStageStats {
            num_blocks: self.num_blocks,
            num_rows: self.num_rows,
            execution_time_ms: self.execution_time_ms,
        }
    }
}

/// Closed statistics of one finished stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedStageStats {
    /// Blocks emitted by the stage.
    pub num_blocks: u64,
    /// Rows emitted by the stage.
    pub num_rows: u64,
    /// Wall time the stage spent executing, milliseconds.
    pub execution_time_ms: u64,
}

/// Statistics of a whole multi-stage query, as seen from one stage.
///
/// `current` holds the open stats of `current_stage_id`; `upstream` holds the
/// closed stats streamed down from stages above it. When the reduce stage
/// observes the successful end-of-stream, `current_stage_id` is 0 and every
/// upstream position `1..=max_stage_id()` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiStageQueryStats {
    /// Stage these stats are anchored at.
    pub current_stage_id: i32,
    /// Open stats of the current stage.
    pub current: StageStats,
    /// Closed stats of upstream stages, keyed by stage id.
    pub upstream: BTreeMap<i32, ClosedStageStats>,
}

impl MultiStageQueryStats {
    /// Fresh stats anchored at `current_stage_id`.
    pub fn new(current_stage_id: i32) -> Self {
        Self {
            current_stage_id,
            current: StageStats::default(),
            upstream: BTreeMap::new(),
        }
    }

    /// Highest stage id with stats present.
    pub fn max_stage_id(&self) -> i32 {
        self.upstream
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.current_stage_id)
    }

    /// Attach closed stats for an upstream stage.
    pub fn register_upstream(&mut self, stage_id: i32, stats: ClosedStageStats) {
        self.upstream.insert(stage_id, stats);
    }

    /// Closed stats of an upstream stage; positions `1..=max_stage_id()` are
    /// guaranteed by the mailbox layer, so a miss is a structural bug.
    pub fn upstream_stage_stats(&self, stage_id: i32) -> Result<&ClosedStageStats> {
        self.upstream.get(&stage_id).ok_or_else(|| {
            MsqError::Invariant(format!("missing upstream stats for stage {stage_id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_closes() {
        let mut stats = StageStats::default();
        stats.record_block(10);
        stats.record_block(5);
        stats.add_execution_time_ms(7);

        let closed = stats.close();
        assert_eq!(closed.num_blocks, 2);
        assert_eq!(closed.num_rows, 15);
        assert_eq!(closed.execution_time_ms, 7);
    }

    #[test]
    fn max_stage_id_tracks_upstream() {
        let mut stats = MultiStageQueryStats::new(0);
        assert_eq!(stats.max_stage_id(), 0);

        stats.register_upstream(1, ClosedStageStats::default());
        stats.register_upstream(2, ClosedStageStats::default());
        assert_eq!(stats.max_stage_id(), 2);
        assert!(stats.upstream_stage_stats(2).is_ok());
    }

    #[test]
    fn missing_upstream_position_is_an_invariant_error() {
        let stats = MultiStageQueryStats::new(0);
        let err = stats.upstream_stage_stats(1).unwrap_err();
        assert_eq!(err.kind(), "InvariantError");
    }
}
