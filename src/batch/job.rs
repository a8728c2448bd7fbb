use tokio::sync::oneshot;

use crate::ledger::{EncodedOperation, LedgerError, TransferResult};

/// Settled result of one job
pub type JobOutcome = Result<TransferResult, LedgerError>;

/// One encoded operation waiting for its batch, plus where its result goes.
#[derive(Debug)]
pub struct Job {
    operation: EncodedOperation,
    completion: JobCompletion,
}

impl Job {
    pub fn new(operation: EncodedOperation) -> (Self, JobReceipt) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            operation,
            completion: JobCompletion(tx),
        };
        (job, JobReceipt(rx))
    }

    pub fn into_parts(self) -> (EncodedOperation, JobCompletion) {
        (self.operation, self.completion)
    }
}

/// Consumed exactly once, when the job's batch settles.
#[derive(Debug)]
pub struct JobCompletion(oneshot::Sender<JobOutcome>);

impl JobCompletion {
    pub fn complete(self, outcome: JobOutcome) {
        // The submitter may have stopped waiting
        let _ = self.0.send(outcome);
    }
}

/// Caller side of a job's completion
#[derive(Debug)]
pub struct JobReceipt(oneshot::Receiver<JobOutcome>);

impl JobReceipt {
    pub async fn outcome(self) -> JobOutcome {
        self.0.await.unwrap_or(Err(LedgerError::Abandoned))
    }
}
