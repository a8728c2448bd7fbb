use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger operation a job belongs to. Each kind has its own batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Reserve funds for a new transfer (two-phase pending transfer)
    Create,
    /// Post or void a previously created transfer
    Accept,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::Create, OperationKind::Accept];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Accept => "ACCEPT",
        }
    }

    /// Operation byte in the request frame
    pub fn wire_code(&self) -> u8 {
        match self {
            OperationKind::Create => 1,
            OperationKind::Accept => 2,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Inbound payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Money {
    pub currency: String,
    /// Decimal string, e.g. "100.25"
    pub amount: String,
}

/// Body of `POST /transfers`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPrepare {
    pub transfer_id: String,
    pub payer_fsp: String,
    pub payee_fsp: String,
    pub amount: Money,
    #[serde(default)]
    pub ilp_packet: String,
    /// base64url SHA-256 condition
    pub condition: String,
    /// RFC 3339 timestamp
    pub expiration: String,
}

/// Body of `PUT /transfers/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFulfil {
    /// base64url 32-byte preimage
    pub fulfilment: String,
    #[serde(default)]
    pub completed_timestamp: Option<String>,
    pub transfer_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation {
    /// Four-digit FSPIOP error code
    pub error_code: String,
    pub error_description: String,
}

/// Body of `PUT /transfers/{id}/error`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferErrorCallback {
    pub error_information: ErrorInformation,
}

/// A validated-by-serde payload ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferPayload {
    Prepare(TransferPrepare),
    Fulfil {
        transfer_id: String,
        fulfil: TransferFulfil,
    },
    /// The payee aborts a pending transfer
    Error {
        transfer_id: String,
        error: TransferErrorCallback,
    },
}

impl TransferPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            TransferPayload::Prepare(_) => OperationKind::Create,
            TransferPayload::Fulfil { .. } | TransferPayload::Error { .. } => OperationKind::Accept,
        }
    }

    pub fn transfer_id(&self) -> &str {
        match self {
            TransferPayload::Prepare(prepare) => &prepare.transfer_id,
            TransferPayload::Fulfil { transfer_id, .. }
            | TransferPayload::Error { transfer_id, .. } => transfer_id,
        }
    }
}

// ============================================================================
// Ledger results
// ============================================================================

/// Per-operation result code returned by the ledger, positionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferResult {
    Ok,
    LinkedEventFailed,
    Exists,
    ExceedsCredits,
    ExceedsDebits,
    PendingTransferNotFound,
    PendingTransferAlreadyPosted,
    PendingTransferAlreadyVoided,
    PendingTransferExpired,
    Other(u32),
}

impl TransferResult {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => TransferResult::Ok,
            1 => TransferResult::LinkedEventFailed,
            2 => TransferResult::Exists,
            3 => TransferResult::ExceedsCredits,
            4 => TransferResult::ExceedsDebits,
            5 => TransferResult::PendingTransferNotFound,
            6 => TransferResult::PendingTransferAlreadyPosted,
            7 => TransferResult::PendingTransferAlreadyVoided,
            8 => TransferResult::PendingTransferExpired,
            other => TransferResult::Other(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            TransferResult::Ok => 0,
            TransferResult::LinkedEventFailed => 1,
            TransferResult::Exists => 2,
            TransferResult::ExceedsCredits => 3,
            TransferResult::ExceedsDebits => 4,
            TransferResult::PendingTransferNotFound => 5,
            TransferResult::PendingTransferAlreadyPosted => 6,
            TransferResult::PendingTransferAlreadyVoided => 7,
            TransferResult::PendingTransferExpired => 8,
            TransferResult::Other(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TransferResult::Ok)
    }
}
