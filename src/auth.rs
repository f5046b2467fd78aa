use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::api::routes::AppState;

/// Minimum length of an accepted client API key.
pub const MIN_KEY_LENGTH: usize = 32;

/// The authenticated caller, resolved from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Opaque owner identity: hex SHA-256 of the accepted API key.
    pub id: String,
}

/// Derives the stable owning-user identity for an API key. The raw key is
/// never stored alongside user data.
pub fn user_id_for_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                let body = Json(json!({
                    "error": "Missing authorization header"
                }));
                (StatusCode::UNAUTHORIZED, body).into_response()
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            let body = Json(json!({
                "error": "Invalid authorization format"
            }));
            (StatusCode::BAD_REQUEST, body).into_response()
        })?;

        let accepted = {
            let config = state.config.read().await;
            token.len() >= MIN_KEY_LENGTH && config.api_keys.iter().any(|k| k == token)
        };

        if accepted {
            Ok(AuthUser {
                id: user_id_for_key(token),
            })
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Invalid API key" })),
            )
                .into_response())
        }
    }
}
