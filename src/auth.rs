//! Bearer-key and source-address checks applied in front of every data route.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::GatewayError;

/// Tokens longer than this are treated as malformed without comparing.
const MAX_TOKEN_LEN: usize = 4 * 1024;

/// What the guard learned about an accepted request. Audit logging only.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub source: Option<IpAddr>,
}

/// Decide whether a request may proceed.
///
/// The credential is checked before the source address, so a bad key is
/// always reported as 401 whatever the caller's address.
pub fn authorize(
    config: &Config,
    authorization: Option<&str>,
    source: Option<IpAddr>,
) -> Result<AuthContext, GatewayError> {
    let token = authorization
        .and_then(bearer_token)
        .ok_or(GatewayError::Unauthenticated)?;

    if !constant_time_compare(token.as_bytes(), config.api_key.as_bytes()) {
        return Err(GatewayError::InvalidCredential);
    }

    let source = source.map(|ip| ip.to_canonical());
    if config.allowlist_enabled() {
        let allowed = source.is_some_and(|ip| config.allowed_source_ips.contains(&ip));
        if !allowed {
            return Err(GatewayError::ForbiddenSource);
        }
    }

    Ok(AuthContext { source })
}

/// Extract the token from an `Authorization: Bearer <token>` value.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return None;
    }
    Some(token)
}

/// Compare two secrets in time independent of where they differ.
///
/// Both sides are padded to the longer length with different fill bytes and
/// the length check is folded into the same constant-time result.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a);
    b_padded[..b.len()].copy_from_slice(b);

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}

/// Middleware wrapping the protected routes.
pub async fn require_api_key(
    State(config): State<Arc<Config>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let source = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match authorize(&config, header, source) {
        Ok(ctx) => {
            log::debug!("authorized {} {} from {:?}", req.method(), req.uri().path(), ctx.source);
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(err) => {
            log::warn!(
                "rejected {} {} from {:?}: {}",
                req.method(),
                req.uri().path(),
                source,
                err.code()
            );
            err.into_response()
        }
    }
}
