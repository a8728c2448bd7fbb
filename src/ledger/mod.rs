// ============================================================================
// Ledger Adapter
// ============================================================================
//
// Bridges the batch queue and the backend ledger:
// - `encode` turns a transfer payload into the ledger's wire record
// - `execute` submits one batch in a single round trip and settles every
//   job positionally (job i <-> result i)
//
// A failed round trip fails every job of that batch with the same error.
// Nothing is retried here.
//
// ============================================================================

pub mod client;
pub mod codec;
pub mod types;

pub use client::TcpLedgerBackend;
pub use codec::{EncodedOperation, Transfer};
pub use types::{
    ErrorInformation, Money, OperationKind, TransferErrorCallback, TransferFulfil,
    TransferPayload, TransferPrepare, TransferResult,
};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::batch::Job;
use crate::metrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed payload; raised before the job enters a batch
    #[error("invalid {field}: {reason}")]
    Encoding { field: &'static str, reason: String },

    #[error("ledger backend unavailable: {0}")]
    Unavailable(String),

    #[error("ledger protocol error: {0}")]
    Protocol(String),

    #[error("ledger returned {actual} results for a batch of {expected}")]
    ResultCountMismatch { expected: usize, actual: usize },

    /// The job's batch was dropped without being settled
    #[error("job abandoned before the ledger answered")]
    Abandoned,
}

impl LedgerError {
    pub fn encoding(field: &'static str, reason: impl Into<String>) -> Self {
        LedgerError::Encoding {
            field,
            reason: reason.into(),
        }
    }
}

/// The backend ledger service. One call is one round trip.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    async fn submit(
        &self,
        kind: OperationKind,
        batch: Vec<EncodedOperation>,
    ) -> Result<Vec<TransferResult>, LedgerError>;

    async fn create_transfers(
        &self,
        batch: Vec<EncodedOperation>,
    ) -> Result<Vec<TransferResult>, LedgerError> {
        self.submit(OperationKind::Create, batch).await
    }

    async fn accept_transfers(
        &self,
        batch: Vec<EncodedOperation>,
    ) -> Result<Vec<TransferResult>, LedgerError> {
        self.submit(OperationKind::Accept, batch).await
    }
}

#[derive(Clone)]
pub struct LedgerClient {
    backend: Arc<dyn LedgerBackend>,
}

impl LedgerClient {
    pub fn new(backend: Arc<dyn LedgerBackend>) -> Self {
        Self { backend }
    }

    pub fn encode(
        &self,
        kind: OperationKind,
        payload: &TransferPayload,
    ) -> Result<EncodedOperation, LedgerError> {
        codec::encode(kind, payload)
    }

    /// Runs one batch and settles each job with its own result.
    pub async fn execute(&self, kind: OperationKind, batch_id: u64, jobs: Vec<Job>) {
        let expected = jobs.len();
        let (operations, completions): (Vec<_>, Vec<_>) =
            jobs.into_iter().map(Job::into_parts).unzip();

        let timer = metrics::LEDGER_ROUND_TRIP_SECONDS
            .with_label_values(&[kind.as_str()])
            .start_timer();
        let outcome = match kind {
            OperationKind::Create => self.backend.create_transfers(operations).await,
            OperationKind::Accept => self.backend.accept_transfers(operations).await,
        };
        timer.observe_duration();

        let outcome = outcome.and_then(|results| {
            if results.len() == expected {
                Ok(results)
            } else {
                Err(LedgerError::ResultCountMismatch {
                    expected,
                    actual: results.len(),
                })
            }
        });

        match outcome {
            Ok(results) => {
                let rejected = results.iter().filter(|r| !r.is_ok()).count();
                if rejected > 0 {
                    metrics::JOBS_REJECTED_TOTAL
                        .with_label_values(&[kind.as_str()])
                        .inc_by(rejected as u64);
                }
                debug!(
                    batch_id = batch_id,
                    kind = %kind,
                    jobs = expected,
                    rejected = rejected,
                    "Ledger batch executed"
                );
                for (completion, result) in completions.into_iter().zip(results) {
                    completion.complete(Ok(result));
                }
            }
            Err(e) => {
                warn!(
                    batch_id = batch_id,
                    kind = %kind,
                    jobs = expected,
                    error = %e,
                    "Ledger batch failed, failing every job in it"
                );
                metrics::JOBS_FAILED_TOTAL
                    .with_label_values(&[kind.as_str()])
                    .inc_by(expected as u64);
                for completion in completions {
                    completion.complete(Err(e.clone()));
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingBackend, op};
    use super::*;

    fn jobs(ids: &[u128]) -> (Vec<Job>, Vec<crate::batch::JobReceipt>) {
        ids.iter().map(|id| Job::new(op(*id))).unzip()
    }

    #[tokio::test]
    async fn test_results_map_positionally() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.result_code.lock().unwrap() = 2;
        let client = LedgerClient::new(backend.clone());

        let (jobs, receipts) = jobs(&[7, 8, 9]);
        client.execute(OperationKind::Create, 1, jobs).await;

        for receipt in receipts {
            assert_eq!(receipt.outcome().await, Ok(TransferResult::Exists));
        }
        assert_eq!(backend.batches()[0].ids, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_backend_failure_fails_every_job() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.fail_next.lock().unwrap() = 1;
        let client = LedgerClient::new(backend.clone());

        let (jobs, receipts) = jobs(&[1, 2]);
        client.execute(OperationKind::Accept, 1, jobs).await;

        for receipt in receipts {
            assert!(matches!(receipt.outcome().await, Err(LedgerError::Unavailable(_))));
        }
        assert_eq!(backend.batches()[0].kind, OperationKind::Accept);
    }

    #[tokio::test]
    async fn test_short_answer_is_a_batch_failure() {
        let backend = Arc::new(RecordingBackend::default());
        *backend.short_answer.lock().unwrap() = true;
        let client = LedgerClient::new(backend);

        let (jobs, receipts) = jobs(&[1, 2, 3]);
        client.execute(OperationKind::Create, 1, jobs).await;

        for receipt in receipts {
            assert_eq!(
                receipt.outcome().await,
                Err(LedgerError::ResultCountMismatch {
                    expected: 3,
                    actual: 2
                })
            );
        }
    }
}
