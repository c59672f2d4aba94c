//! Rate limit check and policy reload handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{HeaderValue, StatusCode, header};
use rate_limit::{RateLimitManager, RateLimitRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CheckRequest {
    identity: String,
    tier: u32,
    #[serde(default)]
    action: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CheckResponse {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReloadResponse {
    entries: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
}

/// Consumes a token for the caller and reports whether the request may proceed.
pub(crate) async fn check(
    State(manager): State<Arc<RateLimitManager>>,
    Json(CheckRequest { identity, tier, action }): Json<CheckRequest>,
) -> Response {
    let mut builder = RateLimitRequest::builder(identity).tier(tier);

    if let Some(action) = action {
        builder = builder.action(action);
    }

    // Storage failures are admitted inside the manager, so an error here is always a rejection.
    let err = match manager.check_request(&builder.build()).await {
        Ok(()) => return allowed(),
        Err(err) => err,
    };

    log::debug!("Request rejected due to rate limit: {err}");

    let retry_after = err.retry_after().map(|duration| duration.as_secs());

    let body = CheckResponse {
        allowed: false,
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();

    if let Some(seconds) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
    }

    response
}

/// Loads the policy document again and swaps it in.
pub(crate) async fn reload(State(manager): State<Arc<RateLimitManager>>) -> Response {
    match manager.resolver().reload() {
        Ok(entries) => Json(ReloadResponse { entries }).into_response(),
        Err(e) => {
            let body = ErrorResponse { error: e.to_string() };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
    }
}

fn allowed() -> Response {
    let body = CheckResponse {
        allowed: true,
        retry_after: None,
    };

    Json(body).into_response()
}
