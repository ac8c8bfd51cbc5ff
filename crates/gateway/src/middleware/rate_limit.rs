//! Fixed-window rate limiting in front of every API route
//!
//! The window depends on the route family: `/auth/*`, `/documents/upload`,
//! and everything else. Health and metrics probes are never limited.

use crate::AppState;
use axum::{
    extract::{ConnectInfo, OriginalUri, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use lexdesk_common::{config::WindowConfig, errors::AppError, metrics};
use std::net::SocketAddr;

/// Route family a request is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Auth,
    Upload,
    General,
}

impl Scope {
    pub fn for_path(path: &str) -> Option<Scope> {
        match path {
            "/health" | "/ready" | "/metrics" => None,
            "/documents/upload" => Some(Scope::Upload),
            p if p == "/auth" || p.starts_with("/auth/") => Some(Scope::Auth),
            _ => Some(Scope::General),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Auth => "auth",
            Scope::Upload => "upload",
            Scope::General => "general",
        }
    }

    fn window(&self, state: &AppState) -> WindowConfig {
        let limits = &state.config.rate_limit;
        match self {
            Scope::Auth => limits.auth,
            Scope::Upload => limits.upload,
            Scope::General => limits.general,
        }
    }
}

/// Client address. The first `x-forwarded-for` hop counts only when the
/// deployment trusts its proxy; otherwise the socket peer.
fn client_key(request: &Request, trust_forwarded_for: bool) -> String {
    let forwarded = || {
        request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let peer = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    };

    let key = if trust_forwarded_for {
        forwarded().or_else(peer)
    } else {
        peer()
    };
    key.unwrap_or_else(|| "anonymous".to_string())
}

/// Rate limiting middleware
pub async fn enforce(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(request).await;
    }

    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let Some(scope) = Scope::for_path(&path) else {
        return next.run(request).await;
    };

    let window = scope.window(&state);
    let key = format!("{}:{}", scope.as_str(), client_key(&request, state.config.rate_limit.trust_forwarded_for));

    let decision = match state.limiter.check(&key, window.window(), window.max).await {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(error = %e, scope = scope.as_str(), "Rate limiter unavailable, allowing request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        tracing::warn!(scope = scope.as_str(), key = %key, "Rate limit exceeded");
        metrics::record_rate_limited(scope.as_str());
        let mut response = AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }
        .into_response();
        set_headers(&mut response, decision.limit, 0);
        return response;
    }

    let mut response = next.run(request).await;
    set_headers(&mut response, decision.limit, decision.remaining);
    response
}

fn set_headers(response: &mut Response, limit: u32, remaining: u32) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
}
