//! API key authentication extractor.
//!
//! Extracts the API key from:
//! - `Authorization: Bearer <key>` header
//! - `X-API-Key: <key>` header
//!
//! and resolves it to a principal through [`PrincipalResolver`]. The
//! resolved principal scopes every conversation operation.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use plugforge_core::identity::PrincipalResolver;
use plugforge_types::identity::PrincipalId;

use crate::http::error::AppError;
use crate::state::AppState;

/// The authenticated principal of a request.
#[derive(Debug, Clone)]
pub struct Authenticated(pub PrincipalId);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(&parts.headers)?.ok_or_else(|| {
            AppError::Unauthorized(
                "Missing API key. Provide via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
            )
        })?;

        match state.principals.resolve_principal(&api_key).await? {
            Some(pid) => Ok(Authenticated(pid)),
            None => Err(AppError::Unauthorized(
                "Invalid API key. Provide a valid key via 'Authorization: Bearer <key>' or 'X-API-Key: <key>' header.".to_string(),
            )),
        }
    }
}

/// Extract the API key from request headers. `Ok(None)` when neither
/// header is present.
pub fn extract_api_key(headers: &HeaderMap) -> Result<Option<String>, AppError> {
    if let Some(auth) = headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(Some(key.trim().to_string()));
        }
    }

    if let Some(key) = headers.get("x-api-key") {
        let key_str = key.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-API-Key header encoding".to_string())
        })?;
        return Ok(Some(key_str.trim().to_string()));
    }

    Ok(None)
}
