//! Mailbox service: named in-process channels delivering data blocks.
//!
//! Contract:
//! - a mailbox is identified by `(request_id, stage_id)` of the receiving
//!   stage;
//! - the receive side of a mailbox can be claimed at most once per request;
//! - senders never block for long: channels are bounded and sized for the
//!   expected in-flight block count;
//! - `shutdown` drops every channel, waking pending receivers with a closed
//!   stream.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use msq_common::error::{MsqError, Result};
use msq_common::ids::RequestId;

use crate::blocks::DataBlock;

const DEFAULT_MAILBOX_CAPACITY: usize = 128;

/// Identifies one mailbox: the receiving stage of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxKey {
    /// Request the mailbox belongs to.
    pub request_id: RequestId,
    /// Receiving stage id.
    pub stage_id: i32,
}

/// Receive half of a mailbox.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<DataBlock>,
}

impl MailboxReceiver {
    /// Next block, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<DataBlock> {
        self.rx.recv().await
    }
}

/// Send half of a mailbox; cheap to clone.
#[derive(Clone)]
pub struct MailboxSender {
    tx: mpsc::Sender<DataBlock>,
}

impl MailboxSender {
    /// Deliver one block, waiting for queue room if needed.
    pub async fn send(&self, block: DataBlock) -> Result<()> {
        self.tx
            .send(block)
            .await
            .map_err(|_| MsqError::Transport("mailbox closed before end-of-stream".to_string()))
    }
}

/// Block-delivery contract the reduce runner depends on.
pub trait MailboxService: Send + Sync {
    /// Claim the receive side of a mailbox; at most once per mailbox.
    fn open_receive(&self, request_id: RequestId, stage_id: i32) -> Result<MailboxReceiver>;

    /// Drop all mailboxes and wake pending receivers.
    fn shutdown(&self);
}

struct MailboxEntry {
    tx: mpsc::Sender<DataBlock>,
    rx: Option<mpsc::Receiver<DataBlock>>,
}

/// In-process mailbox service backed by bounded tokio channels.
///
/// Production deployments back the same contract with the network data
/// plane; this implementation serves the broker-local reduce stage and
/// tests.
#[derive(Clone)]
pub struct InProcessMailboxService {
    capacity: usize,
    mailboxes: Arc<Mutex<HashMap<MailboxKey, MailboxEntry>>>,
}

impl InProcessMailboxService {
    /// Service with the default per-mailbox capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    /// Service with an explicit per-mailbox capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Obtain a sender for a mailbox, creating the channel if absent.
    pub fn open_send(&self, request_id: RequestId, stage_id: i32) -> MailboxSender {
        let key = MailboxKey {
            request_id,
            stage_id,
        };
        let mut mailboxes = self.mailboxes.lock();
        let entry = mailboxes.entry(key).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            MailboxEntry { tx, rx: Some(rx) }
        });
        MailboxSender {
            tx: entry.tx.clone(),
        }
    }
}

impl Default for InProcessMailboxService {
    fn default() -> Self {
        Self::new()
    }
}

impl MailboxService for InProcessMailboxService {
    fn open_receive(&self, request_id: RequestId, stage_id: i32) -> Result<MailboxReceiver> {
        let key = MailboxKey {
            request_id,
            stage_id,
        };
        let mut mailboxes = self.mailboxes.lock();
        let entry = mailboxes.entry(key).or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.capacity);
            MailboxEntry { tx, rx: Some(rx) }
        });
        let rx = entry.rx.take().ok_or_else(|| {
            MsqError::Invariant(format!(
                "receive side of mailbox for request {request_id} stage {stage_id} already claimed"
            ))
        })?;
        debug!(request_id = %request_id, stage_id, "opened mailbox receive");
        Ok(MailboxReceiver { rx })
    }

    fn shutdown(&self) {
        self.mailboxes.lock().clear();
    }
}
