//! Typed data blocks delivered through stage mailboxes.
//!
//! A stream of blocks is zero or more [`DataBlock::Rows`] payloads terminated
//! by exactly one end-of-stream marker: [`DataBlock::Eos`] on success
//! (carrying the accumulated query stats) or [`DataBlock::Error`] on failure
//! (carrying the worker-reported exception messages).

use serde::{Deserialize, Serialize};

use msq_common::schema::Value;

use crate::stats::MultiStageQueryStats;

/// One batch delivered through a mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataBlock {
    /// Row payload.
    Rows(Vec<Vec<Value>>),
    /// Successful end-of-stream with accumulated stats.
    Eos(MultiStageQueryStats),
    /// Failed end-of-stream with worker-reported exceptions.
    Error(Vec<String>),
}

impl DataBlock {
    /// Whether this block terminates the stream (successfully or not).
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, DataBlock::Eos(_) | DataBlock::Error(_))
    }

    /// Whether this is the failed end-of-stream marker.
    pub fn is_error_block(&self) -> bool {
        matches!(self, DataBlock::Error(_))
    }

    /// Rows carried by this block; empty for end-of-stream markers.
    pub fn rows(&self) -> &[Vec<Value>] {
        match self {
            DataBlock::Rows(rows) => rows,
            _ => &[],
        }
    }

    /// Number of rows carried by this block.
    pub fn num_rows(&self) -> usize {
        self.rows().len()
    }
}
