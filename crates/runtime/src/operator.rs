//! The mailbox receive operator drained by the broker-side reduce stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, Span};

use msq_common::deadline::Deadline;
use msq_common::error::{MsqError, Result};
use msq_common::ids::RequestId;
use msq_planner::plan_node::MailboxReceiveNode;
use msq_planner::routing::{StageMetadata, WorkerMetadata};

use crate::blocks::DataBlock;
use crate::mailbox::{MailboxReceiver, MailboxService};

/// Execution context of one operator chain.
#[derive(Clone)]
pub struct OpChainExecutionContext {
    /// Request this chain serves.
    pub request_id: RequestId,
    /// Absolute deadline of the request.
    pub deadline: Deadline,
    /// Verbatim user query options.
    pub query_options: BTreeMap<String, String>,
    /// Metadata of the stage this chain belongs to.
    pub stage_metadata: StageMetadata,
    /// The worker this chain runs as.
    pub worker_metadata: WorkerMetadata,
    /// Span of the submitting caller, for trace continuity.
    pub parent_span: Span,
}

/// Pulls typed blocks for one receiving stage until end-of-stream.
///
/// `next_block` waits at most the remaining request deadline; expiry
/// surfaces as a timeout error rather than a block.
pub struct MailboxReceiveOperator {
    request_id: RequestId,
    stage_id: i32,
    sender_stage_id: i32,
    deadline: Deadline,
    receiver: MailboxReceiver,
}

impl MailboxReceiveOperator {
    /// Bind a receive operator to the context's stage mailbox.
    pub fn new(
        mailbox_service: &Arc<dyn MailboxService>,
        ctx: &OpChainExecutionContext,
        node: &MailboxReceiveNode,
    ) -> Result<Self> {
        let stage_id = ctx.stage_metadata.stage_id;
        let receiver = mailbox_service.open_receive(ctx.request_id, stage_id)?;
        debug!(
            parent: &ctx.parent_span,
            request_id = %ctx.request_id,
            stage_id,
            sender_stage_id = node.sender_stage_id,
            "mailbox receive operator opened"
        );
        Ok(Self {
            request_id: ctx.request_id,
            stage_id,
            sender_stage_id: node.sender_stage_id,
            deadline: ctx.deadline,
            receiver,
        })
    }

    /// Next block from the mailbox, bounded by the remaining deadline.
    pub async fn next_block(&mut self) -> Result<DataBlock> {
        let received =
            tokio::time::timeout_at(self.deadline.expires_at(), self.receiver.recv()).await;
        match received {
            Err(_) => Err(MsqError::Timeout(format!(
                "timed out waiting for data block for request {} stage {} (sender stage {})",
                self.request_id, self.stage_id, self.sender_stage_id
            ))),
            Ok(None) => Err(MsqError::Invariant(format!(
                "mailbox for request {} stage {} closed before end-of-stream",
                self.request_id, self.stage_id
            ))),
            Ok(Some(block)) => Ok(block),
        }
    }
}
