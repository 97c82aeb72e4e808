//! Login endpoints. Both hand out a bearer token.

use axum::Json;
use axum::extract::State;

use crate::dto::{AdminLogin, AdminSession, LoginResponse, UserView};
use crate::error::{Error, Result};
use crate::identity::TelegramAuth;
use crate::router::Valid;
use crate::AppState;

/// Exchanges a signed Telegram login for a session, creating the user on
/// first login.
pub async fn telegram(
    State(state): State<AppState>,
    Json(auth): Json<TelegramAuth>,
) -> Result<Json<LoginResponse>> {
    let verifier = state.telegram.as_ref().ok_or(Error::Unauthorized)?;
    verifier.verify(&auth)?;

    let user = state
        .users
        .login(&auth.id.to_string(), &auth.display_name())
        .await?;
    let token = state.token.create(&user.id, false)?;
    let security_status = state.users.security(&user);

    Ok(Json(LoginResponse {
        user: UserView {
            user,
            security_status,
        },
        token,
    }))
}

pub async fn admin(
    State(state): State<AppState>,
    Valid(body): Valid<AdminLogin>,
) -> Result<Json<AdminSession>> {
    let verifier = state.admin.as_ref().ok_or(Error::Unauthorized)?;
    verifier.verify(&body.username, &body.password)?;

    tracing::info!(username = %body.username, "administrator logged in");
    Ok(Json(AdminSession {
        token: state.token.create(&body.username, true)?,
        username: body.username,
        is_admin: true,
    }))
}
