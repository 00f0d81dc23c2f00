use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    error::AppError,
    limiter::{LimiterKind, RateLimiters},
};

const FINGERPRINT_LEN: usize = 10;

/// Throttling key for a request: a prefix of the bearer credential when one is
/// presented, otherwise the peer address. Never used for authentication.
pub fn client_key(authorization: Option<&str>, peer: Option<SocketAddr>) -> String {
    if let Some(token) = authorization.and_then(|value| value.strip_prefix("Bearer ")) {
        let token = token.trim();
        if !token.is_empty() {
            return token.chars().take(FINGERPRINT_LEN).collect();
        }
    }
    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

pub async fn rate_limit(
    State(limiters): State<Arc<RateLimiters>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(kind) = LimiterKind::classify(request.method(), request.uri().path()) else {
        return next.run(request).await;
    };

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let key = client_key(authorization, peer);

    if !limiters.admit(kind, &key) {
        let limiter = limiters.get(kind);
        let policy = limiter.policy();
        tracing::debug!(
            limiter = limiter.name(),
            max_requests = policy.max_requests,
            window_ms = policy.window_ms,
            path = %request.uri().path(),
            "request rejected by rate limiter"
        );
        return AppError::RateLimited.into_response();
    }

    next.run(request).await
}
