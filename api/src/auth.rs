use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::errors::{Error, Result};
use crate::store::IdentityResolver;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Owner key of the authenticated caller, attached to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

/// 401 body shared by every authentication failure.
pub fn unauthorized(message: &str, path: &str) -> Response {
    let body = json!({
        "status": StatusCode::UNAUTHORIZED.as_u16(),
        "message": message,
        "_links": { "self": { "href": path } },
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Resolves the caller's owner key from the raw header value.
pub async fn authenticate(
    identities: &dyn IdentityResolver,
    api_key: Option<&str>,
) -> Result<String> {
    let api_key = api_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| Error::Unauthorized("API key is missing".to_string()))?;

    identities
        .resolve(api_key)
        .await?
        .ok_or_else(|| Error::Unauthorized("Invalid API key".to_string()))
}

pub async fn api_key_middleware(
    State(identities): State<Arc<dyn IdentityResolver>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match authenticate(identities.as_ref(), api_key.as_deref()).await {
        Ok(owner) => {
            request.extensions_mut().insert(Owner(owner));
            next.run(request).await
        }
        Err(Error::Unauthorized(message)) => {
            warn!(path = %path, reason = %message, "Rejected request");
            unauthorized(&message, &path)
        }
        Err(e) => {
            error!("API key lookup failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
