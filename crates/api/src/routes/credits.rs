//! Routes for the `/credits` resource.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use mirage_db::repositories::ledger_repo::LedgerRepo;

use crate::auth::AccountId;
use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Routes mounted at `/credits`.
///
/// ```text
/// GET    /    -> get_balance
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_balance))
}

/// GET /api/v1/credits
///
/// The caller's available balance plus net consumption per job kind.
async fn get_balance(
    account: AccountId,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let balance = LedgerRepo::balance(&state.pool, account.0).await?;
    Ok(Json(DataResponse { data: balance }))
}
