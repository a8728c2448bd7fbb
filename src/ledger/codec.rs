// ============================================================================
// Ledger Codec
// ============================================================================
//
// Pure transforms between inbound transfer payloads and the ledger's wire
// format. No I/O happens here.
//
// Transfer record (128 bytes, little-endian):
//
//   id u128 | debit_account_id u128 | credit_account_id u128 | amount u128
//   pending_id u128 | user_data_128 u128 | user_data_64 u64 | user_data_32 u32
//   timeout u32 | ledger u32 | code u16 | flags u16 | timestamp u64
//
// Request frame:  operation u8 | count u32 | count x record
// Response frame: count u32 | count x result code u32
//
// ============================================================================

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::LedgerError;
use super::types::{OperationKind, TransferPayload, TransferResult};

pub const TRANSFER_SIZE: usize = 128;
pub const REQUEST_HEADER_SIZE: usize = 5;
pub const RESULT_SIZE: usize = 4;

/// Amounts are carried as integers of 10^-4 units
pub const AMOUNT_SCALE_DIGITS: usize = 4;

/// Transfer code for gateway-originated transfers
const TRANSFER_CODE: u16 = 1;

pub mod flags {
    pub const PENDING: u16 = 1 << 1;
    pub const POST_PENDING: u16 = 1 << 2;
    pub const VOID_PENDING: u16 = 1 << 3;
}

/// Decoded view of one transfer record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub id: u128,
    pub debit_account_id: u128,
    pub credit_account_id: u128,
    pub amount: u128,
    pub pending_id: u128,
    pub user_data_128: u128,
    pub user_data_64: u64,
    pub user_data_32: u32,
    pub timeout: u32,
    pub ledger: u32,
    pub code: u16,
    pub flags: u16,
    pub timestamp: u64,
}

impl Transfer {
    pub fn to_bytes(&self) -> [u8; TRANSFER_SIZE] {
        let mut buf = BytesMut::with_capacity(TRANSFER_SIZE);
        buf.put_u128_le(self.id);
        buf.put_u128_le(self.debit_account_id);
        buf.put_u128_le(self.credit_account_id);
        buf.put_u128_le(self.amount);
        buf.put_u128_le(self.pending_id);
        buf.put_u128_le(self.user_data_128);
        buf.put_u64_le(self.user_data_64);
        buf.put_u32_le(self.user_data_32);
        buf.put_u32_le(self.timeout);
        buf.put_u32_le(self.ledger);
        buf.put_u16_le(self.code);
        buf.put_u16_le(self.flags);
        buf.put_u64_le(self.timestamp);

        let mut out = [0u8; TRANSFER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn from_bytes(bytes: &[u8; TRANSFER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        Self {
            id: buf.get_u128_le(),
            debit_account_id: buf.get_u128_le(),
            credit_account_id: buf.get_u128_le(),
            amount: buf.get_u128_le(),
            pending_id: buf.get_u128_le(),
            user_data_128: buf.get_u128_le(),
            user_data_64: buf.get_u64_le(),
            user_data_32: buf.get_u32_le(),
            timeout: buf.get_u32_le(),
            ledger: buf.get_u32_le(),
            code: buf.get_u16_le(),
            flags: buf.get_u16_le(),
            timestamp: buf.get_u64_le(),
        }
    }
}

/// One operation in the ledger's wire format
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedOperation([u8; TRANSFER_SIZE]);

impl EncodedOperation {
    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self(transfer.to_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; TRANSFER_SIZE] {
        &self.0
    }

    pub fn transfer(&self) -> Transfer {
        Transfer::from_bytes(&self.0)
    }

    pub fn id(&self) -> u128 {
        self.transfer().id
    }
}

impl std::fmt::Debug for EncodedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncodedOperation")
            .field(&format_args!("{:032x}", self.id()))
            .finish()
    }
}

/// Encodes `payload` as an operation of `kind`.
pub fn encode(kind: OperationKind, payload: &TransferPayload) -> Result<EncodedOperation, LedgerError> {
    if payload.kind() != kind {
        return Err(LedgerError::encoding(
            "operation",
            format!("{} payload submitted as {}", payload.kind(), kind),
        ));
    }

    let transfer = match payload {
        TransferPayload::Prepare(prepare) => {
            let ledger = currency_ledger(&prepare.amount.currency)?;
            let condition = decode_digest("condition", &prepare.condition)?;
            Transfer {
                id: parse_transfer_id(&prepare.transfer_id)?,
                debit_account_id: account_id("payerFsp", &prepare.payer_fsp, &prepare.amount.currency)?,
                credit_account_id: account_id("payeeFsp", &prepare.payee_fsp, &prepare.amount.currency)?,
                amount: parse_amount(&prepare.amount.amount)?,
                user_data_128: u128::from_le_bytes(first_16(&condition)),
                user_data_64: parse_timestamp("expiration", &prepare.expiration)?,
                ledger,
                code: TRANSFER_CODE,
                flags: flags::PENDING,
                ..Transfer::default()
            }
        }
        TransferPayload::Fulfil { transfer_id, fulfil } => {
            let pending_id = parse_transfer_id(transfer_id)?;
            decode_digest("fulfilment", &fulfil.fulfilment)?;
            let flags = match fulfil.transfer_state.as_str() {
                "COMMITTED" | "RESERVED" => flags::POST_PENDING,
                "ABORTED" => flags::VOID_PENDING,
                other => {
                    return Err(LedgerError::encoding(
                        "transferState",
                        format!("unsupported state '{}'", other),
                    ));
                }
            };
            let completed = match &fulfil.completed_timestamp {
                Some(ts) => parse_timestamp("completedTimestamp", ts)?,
                None => 0,
            };
            Transfer {
                id: accept_id(transfer_id),
                pending_id,
                user_data_64: completed,
                code: TRANSFER_CODE,
                flags,
                ..Transfer::default()
            }
        }
        TransferPayload::Error { transfer_id, error } => {
            let pending_id = parse_transfer_id(transfer_id)?;
            Transfer {
                id: accept_id(transfer_id),
                pending_id,
                user_data_32: parse_error_code(&error.error_information.error_code)?,
                code: TRANSFER_CODE,
                flags: flags::VOID_PENDING,
                ..Transfer::default()
            }
        }
    };

    Ok(EncodedOperation::from_transfer(&transfer))
}

/// Builds the request frame for one batch.
pub fn request_frame(kind: OperationKind, batch: &[EncodedOperation]) -> Result<Bytes, LedgerError> {
    let count = u32::try_from(batch.len())
        .map_err(|_| LedgerError::Protocol(format!("batch of {} operations is too large", batch.len())))?;

    let mut buf = BytesMut::with_capacity(REQUEST_HEADER_SIZE + batch.len() * TRANSFER_SIZE);
    buf.put_u8(kind.wire_code());
    buf.put_u32_le(count);
    for op in batch {
        buf.put_slice(op.as_bytes());
    }
    Ok(buf.freeze())
}

/// Decodes the result codes following a response header.
pub fn decode_results(mut body: &[u8]) -> Result<Vec<TransferResult>, LedgerError> {
    if body.len() % RESULT_SIZE != 0 {
        return Err(LedgerError::Protocol(format!(
            "result body of {} bytes is not a multiple of {}",
            body.len(),
            RESULT_SIZE
        )));
    }
    let mut results = Vec::with_capacity(body.len() / RESULT_SIZE);
    while body.has_remaining() {
        results.push(TransferResult::from_code(body.get_u32_le()));
    }
    Ok(results)
}

// ============================================================================
// Field helpers
// ============================================================================

fn parse_transfer_id(raw: &str) -> Result<u128, LedgerError> {
    Uuid::parse_str(raw)
        .map(|id| id.as_u128())
        .map_err(|e| LedgerError::encoding("transferId", e.to_string()))
}

/// FSPIOP error codes are four decimal digits
fn parse_error_code(raw: &str) -> Result<u32, LedgerError> {
    if raw.len() != 4 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LedgerError::encoding(
            "errorCode",
            format!("'{}' is not a four-digit code", raw),
        ));
    }
    raw.parse()
        .map_err(|_| LedgerError::encoding("errorCode", format!("'{}' is not a number", raw)))
}

/// Deterministic id for the accept operation of a transfer.
/// Posting, voiding and the error callback share it so only one can land.
fn accept_id(transfer_id: &str) -> u128 {
    let digest = Sha256::digest(format!("fulfil:{}", transfer_id.to_ascii_lowercase()));
    u128::from_le_bytes(first_16(&digest))
}

fn account_id(field: &'static str, fsp: &str, currency: &str) -> Result<u128, LedgerError> {
    if fsp.trim().is_empty() {
        return Err(LedgerError::encoding(field, "must not be empty"));
    }
    let digest = Sha256::digest(format!("{}:{}", fsp, currency));
    Ok(u128::from_le_bytes(first_16(&digest)))
}

/// ISO 4217 alpha code packed into the ledger number
fn currency_ledger(code: &str) -> Result<u32, LedgerError> {
    let bytes = code.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_uppercase) {
        return Err(LedgerError::encoding("currency", format!("'{}' is not an ISO 4217 code", code)));
    }
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]))
}

fn parse_amount(raw: &str) -> Result<u128, LedgerError> {
    let invalid = |reason: &str| LedgerError::encoding("amount", format!("'{}' {}", raw, reason));

    let (whole, frac) = raw.split_once('.').unwrap_or((raw, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !digits(whole) || !digits(frac) || (raw.contains('.') && frac.is_empty()) {
        return Err(invalid("is not a positive decimal"));
    }
    if frac.len() > AMOUNT_SCALE_DIGITS {
        return Err(invalid("has more than 4 fraction digits"));
    }

    let padding = std::iter::repeat(b'0').take(AMOUNT_SCALE_DIGITS - frac.len());
    let mut value: u128 = 0;
    for digit in whole.bytes().chain(frac.bytes()).chain(padding) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u128::from(digit - b'0')))
            .ok_or_else(|| invalid("is too large"))?;
    }
    if value == 0 {
        return Err(invalid("must be greater than zero"));
    }
    Ok(value)
}

/// RFC 3339 timestamp as unix milliseconds
fn parse_timestamp(field: &'static str, raw: &str) -> Result<u64, LedgerError> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| LedgerError::encoding(field, format!("'{}': {}", raw, e)))?;
    u64::try_from(parsed.timestamp_millis())
        .map_err(|_| LedgerError::encoding(field, "must not precede the unix epoch"))
}

fn decode_digest(field: &'static str, raw: &str) -> Result<[u8; 32], LedgerError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('='))
        .map_err(|e| LedgerError::encoding(field, e.to_string()))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| LedgerError::encoding(field, format!("expected 32 bytes, got {}", bytes.len())))
}

fn first_16(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{
        ErrorInformation, Money, TransferErrorCallback, TransferFulfil, TransferPrepare,
    };

    const TRANSFER_ID: &str = "b51ec534-ee48-4575-b6a9-ead2955b8069";
    const CONDITION: &str = "f5sqb7tBTWPd5Y8BDFdMm9BJR_MNI4isf8p8n4D5pHA";

    fn prepare(amount: &str) -> TransferPayload {
        TransferPayload::Prepare(TransferPrepare {
            transfer_id: TRANSFER_ID.to_string(),
            payer_fsp: "dfsp1".to_string(),
            payee_fsp: "dfsp2".to_string(),
            amount: Money {
                currency: "USD".to_string(),
                amount: amount.to_string(),
            },
            ilp_packet: "AYIBgQAAAAAAAASw".to_string(),
            condition: CONDITION.to_string(),
            expiration: "2016-05-24T08:38:08.699-04:00".to_string(),
        })
    }

    fn fulfil(state: &str) -> TransferPayload {
        TransferPayload::Fulfil {
            transfer_id: TRANSFER_ID.to_string(),
            fulfil: TransferFulfil {
                fulfilment: "UNlJ98hZTY_dsw0cAqw4i_UN3v4utt7CZFB4yfLbVFA".to_string(),
                completed_timestamp: Some("2016-05-24T08:38:08.699Z".to_string()),
                transfer_state: state.to_string(),
            },
        }
    }

    #[test]
    fn test_prepare_encodes_pending_transfer() {
        let op = encode(OperationKind::Create, &prepare("123.45")).unwrap();
        let transfer = op.transfer();

        assert_eq!(transfer.id, Uuid::parse_str(TRANSFER_ID).unwrap().as_u128());
        assert_eq!(transfer.amount, 1_234_500);
        assert_eq!(transfer.flags, flags::PENDING);
        assert_eq!(transfer.ledger, u32::from_le_bytes(*b"USD\0"));
        assert_eq!(transfer.user_data_64, 1_464_093_488_699);
        assert_ne!(transfer.debit_account_id, transfer.credit_account_id);
        assert_ne!(transfer.user_data_128, 0);
    }

    #[test]
    fn test_account_ids_are_deterministic() {
        let a = encode(OperationKind::Create, &prepare("1")).unwrap().transfer();
        let b = encode(OperationKind::Create, &prepare("2")).unwrap().transfer();
        assert_eq!(a.debit_account_id, b.debit_account_id);
        assert_eq!(a.credit_account_id, b.credit_account_id);
    }

    #[test]
    fn test_fulfil_posts_or_voids_pending_transfer() {
        let committed = encode(OperationKind::Accept, &fulfil("COMMITTED")).unwrap().transfer();
        assert_eq!(committed.flags, flags::POST_PENDING);
        assert_eq!(committed.pending_id, Uuid::parse_str(TRANSFER_ID).unwrap().as_u128());
        assert_ne!(committed.id, committed.pending_id);

        let aborted = encode(OperationKind::Accept, &fulfil("ABORTED")).unwrap().transfer();
        assert_eq!(aborted.flags, flags::VOID_PENDING);
        assert_eq!(aborted.id, committed.id);
    }

    fn error_callback(code: &str) -> TransferPayload {
        TransferPayload::Error {
            transfer_id: TRANSFER_ID.to_string(),
            error: TransferErrorCallback {
                error_information: ErrorInformation {
                    error_code: code.to_string(),
                    error_description: "Payee rejected the transfer".to_string(),
                },
            },
        }
    }

    #[test]
    fn test_error_callback_voids_pending_transfer() {
        let voided = encode(OperationKind::Accept, &error_callback("5105")).unwrap().transfer();
        assert_eq!(voided.flags, flags::VOID_PENDING);
        assert_eq!(voided.pending_id, Uuid::parse_str(TRANSFER_ID).unwrap().as_u128());
        assert_eq!(voided.user_data_32, 5105);

        let committed = encode(OperationKind::Accept, &fulfil("COMMITTED")).unwrap().transfer();
        assert_eq!(voided.id, committed.id);

        for bad in ["", "510", "51050", "51a5"] {
            let err = encode(OperationKind::Accept, &error_callback(bad)).unwrap_err();
            assert!(matches!(err, LedgerError::Encoding { field: "errorCode", .. }));
        }
    }

    #[test]
    fn test_amount_validation() {
        assert_eq!(parse_amount("5").unwrap(), 50_000);
        assert_eq!(parse_amount("0.0001").unwrap(), 1);
        for bad in ["", "-5", "1.", ".5", "1.23456", "0", "0.0000", "1e3", "12,50", "abc"] {
            assert!(parse_amount(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(parse_amount(&"9".repeat(60)).is_err());
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        let mut bad_id = prepare("1");
        if let TransferPayload::Prepare(p) = &mut bad_id {
            p.transfer_id = "not-a-uuid".to_string();
        }
        let err = encode(OperationKind::Create, &bad_id).unwrap_err();
        assert!(matches!(err, LedgerError::Encoding { field: "transferId", .. }));

        let mut bad_currency = prepare("1");
        if let TransferPayload::Prepare(p) = &mut bad_currency {
            p.amount.currency = "usd".to_string();
        }
        assert!(encode(OperationKind::Create, &bad_currency).is_err());

        assert!(encode(OperationKind::Accept, &fulfil("PENDING")).is_err());
    }

    #[test]
    fn test_kind_must_match_payload() {
        let err = encode(OperationKind::Accept, &prepare("1")).unwrap_err();
        assert!(matches!(err, LedgerError::Encoding { field: "operation", .. }));
    }

    #[test]
    fn test_request_frame_layout() {
        let ops = vec![
            encode(OperationKind::Create, &prepare("1")).unwrap(),
            encode(OperationKind::Create, &prepare("2")).unwrap(),
        ];
        let frame = request_frame(OperationKind::Create, &ops).unwrap();

        assert_eq!(frame.len(), REQUEST_HEADER_SIZE + 2 * TRANSFER_SIZE);
        assert_eq!(frame[0], OperationKind::Create.wire_code());
        assert_eq!(u32::from_le_bytes(frame[1..5].try_into().unwrap()), 2);
        assert_eq!(&frame[5..5 + TRANSFER_SIZE], ops[0].as_bytes());
    }

    #[test]
    fn test_decode_results() {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            decode_results(&body).unwrap(),
            vec![TransferResult::Ok, TransferResult::Exists]
        );
        assert!(decode_results(&body[..5]).is_err());
    }
}
