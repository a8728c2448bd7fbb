// ============================================================================
// Submission Gateway
// ============================================================================
//
// Entry point for an inbound transfer request:
// 1. encode the payload (a malformed payload is rejected here)
// 2. queue the job in its kind's batch
// 3. forward the raw body to the kind's downstream consumer
//
// The caller is acknowledged as soon as this returns; the ledger outcome is
// only logged, and notification delivery is independent of it.
//
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::batch::{BatchQueue, Job, JobReceipt};
use crate::config::{NotificationConfig, NotificationTarget};
use crate::ledger::{LedgerClient, LedgerError, OperationKind, TransferPayload, TransferResult};
use crate::notification::{BestEffort, NotificationForwarder, downstream_path};

/// An accepted request. Neither field needs to be awaited.
#[derive(Debug)]
pub struct Accepted {
    pub batch_id: u64,
    pub notification: BestEffort,
}

#[derive(Clone)]
pub struct Gateway {
    batches: BatchQueue,
    ledger: LedgerClient,
    forwarder: NotificationForwarder,
    notification: Arc<NotificationConfig>,
}

impl Gateway {
    pub fn new(
        batches: BatchQueue,
        ledger: LedgerClient,
        forwarder: NotificationForwarder,
        notification: NotificationConfig,
    ) -> Self {
        Self {
            batches,
            ledger,
            forwarder,
            notification: Arc::new(notification),
        }
    }

    pub fn batches(&self) -> &BatchQueue {
        &self.batches
    }

    /// Queues `payload` and notifies downstream with `body`.
    ///
    /// `path_and_query` is the inbound request target; the downstream path
    /// is derived from it.
    pub fn accept(
        &self,
        payload: &TransferPayload,
        path_and_query: &str,
        body: Bytes,
    ) -> Result<Accepted, LedgerError> {
        let kind = payload.kind();
        let operation = self.ledger.encode(kind, payload)?;

        let (job, receipt) = Job::new(operation);
        let batch_id = self.batches.submit(kind, job);
        tokio::spawn(watch_outcome(
            kind,
            batch_id,
            payload.transfer_id().to_string(),
            receipt,
        ));

        let path = downstream_path(path_and_query, self.notification.path_prefix_segments);
        let notification = self.forwarder.notify(self.target(kind), &path, body);

        Ok(Accepted {
            batch_id,
            notification,
        })
    }

    fn target(&self, kind: OperationKind) -> &NotificationTarget {
        match kind {
            OperationKind::Create => &self.notification.create,
            OperationKind::Accept => &self.notification.accept,
        }
    }
}

async fn watch_outcome(kind: OperationKind, batch_id: u64, transfer_id: String, receipt: JobReceipt) {
    match receipt.outcome().await {
        Ok(TransferResult::Ok) => {
            debug!(batch_id = batch_id, kind = %kind, transfer_id = %transfer_id, "Transfer settled");
        }
        Ok(result) => {
            warn!(
                batch_id = batch_id,
                kind = %kind,
                transfer_id = %transfer_id,
                result = ?result,
                code = result.code(),
                "Ledger rejected transfer"
            );
        }
        Err(e) => {
            warn!(
                batch_id = batch_id,
                kind = %kind,
                transfer_id = %transfer_id,
                error = %e,
                "Transfer failed"
            );
        }
    }
}
