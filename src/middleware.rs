//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::{Error, Result};
use crate::token::Claims;

const BEARER: &str = "Bearer ";

/// Requires a valid bearer token and exposes its [`Claims`] to handlers.
pub async fn auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .ok_or(Error::Unauthorized)?;

    let claims = state.token.decode(token).map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        Error::Unauthorized
    })?;

    req.extensions_mut().insert::<Claims>(claims);
    Ok(next.run(req).await)
}

/// Must run after [`auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response> {
    match req.extensions().get::<Claims>() {
        Some(claims) if claims.admin => Ok(next.run(req).await),
        Some(_) => Err(Error::Forbidden),
        None => Err(Error::Unauthorized),
    }
}
