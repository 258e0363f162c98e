use axum::{
    extract::{Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use super::{ApiError, AppState};

/// Query form of the token, for WebSocket clients that cannot set request
/// headers. The value is percent-decoded like any other query parameter.
#[derive(Debug, Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Reject requests that do not carry the configured bearer token.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = bearer_from_header(&request).or_else(|| token_from_query(&request));

    match presented {
        Some(token) if tokens_match(&token, &state.api_token) => Ok(next.run(request).await),
        Some(_) => Err(ApiError::unauthorized("invalid bearer token")),
        None => Err(ApiError::unauthorized("missing bearer token")),
    }
}

fn bearer_from_header(request: &Request) -> Option<String> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn token_from_query(request: &Request) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(request.uri()).ok()?;
    query.access_token.filter(|token| !token.is_empty())
}

/// Compares in time independent of where the first mismatch is.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let (presented, expected) = (presented.as_bytes(), expected.as_bytes());
    if presented.len() != expected.len() {
        return false;
    }
    presented
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}
