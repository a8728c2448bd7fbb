// ============================================================================
// Transfer Routes
// ============================================================================
//
// Endpoints:
// - POST /transfers               - Queue a create operation
// - PUT  /transfers/:id           - Queue an accept operation
// - PUT  /transfers/:id/fulfil    - Same as above
// - PUT  /transfers/:id/error     - Queue a void of the pending transfer
//
// All respond 202 once the job is queued. The raw body is kept so the
// downstream consumer receives exactly what the caller sent.
//
// ============================================================================

use axum::{
    body::Bytes,
    extract::{OriginalUri, Path, State},
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::ledger::{TransferErrorCallback, TransferFulfil, TransferPayload, TransferPrepare};

/// POST /transfers
pub async fn create_transfer(
    State(app_context): State<Arc<AppContext>>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let prepare: TransferPrepare = serde_json::from_slice(&body)?;
    submit(&app_context, TransferPayload::Prepare(prepare), &uri, body)
}

/// PUT /transfers/:id and PUT /transfers/:id/fulfil
pub async fn fulfil_transfer(
    State(app_context): State<Arc<AppContext>>,
    Path(transfer_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let fulfil: TransferFulfil = serde_json::from_slice(&body)?;
    let payload = TransferPayload::Fulfil {
        transfer_id,
        fulfil,
    };
    submit(&app_context, payload, &uri, body)
}

/// PUT /transfers/:id/error
pub async fn transfer_error(
    State(app_context): State<Arc<AppContext>>,
    Path(transfer_id): Path<String>,
    OriginalUri(uri): OriginalUri,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let error: TransferErrorCallback = serde_json::from_slice(&body)?;
    let payload = TransferPayload::Error { transfer_id, error };
    submit(&app_context, payload, &uri, body)
}

fn submit(
    app_context: &AppContext,
    payload: TransferPayload,
    uri: &Uri,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    let accepted = app_context
        .gateway
        .accept(&payload, path_and_query, body)?;

    tracing::debug!(
        kind = %payload.kind(),
        transfer_id = %payload.transfer_id(),
        batch_id = accepted.batch_id,
        "Transfer queued"
    );

    Ok(StatusCode::ACCEPTED)
}
