//! Caller identity extraction.
//!
//! Upstream terminates the session and forwards the authenticated
//! account in the `x-account-id` header; this service trusts it. The
//! [`AccountId`] extractor rejects requests without the header so
//! handlers never see an anonymous caller.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use mirage_core::types::DbId;

use crate::error::AppError;

/// Header carrying the authenticated account ID.
pub const ACCOUNT_ID_HEADER: &str = "x-account-id";

/// The authenticated account, extracted from request headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountId(pub DbId);

impl<S> FromRequestParts<S> for AccountId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACCOUNT_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {ACCOUNT_ID_HEADER} header")))?;

        let id: DbId = value
            .to_str()
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(format!("Malformed {ACCOUNT_ID_HEADER} header"))
            })?;

        Ok(AccountId(id))
    }
}
