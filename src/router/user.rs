//! Users-related HTTP API.

use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::dto::{AdOptionBody, UserView};
use crate::error::Result;
use crate::model::{DeviceInfo, User};
use crate::router::{Valid, caller, target};
use crate::token::Claims;
use crate::AppState;

fn view(state: &AppState, user: User) -> UserView {
    UserView {
        security_status: state.users.security(&user),
        user,
    }
}

/// Current snapshot of a user, counters rolled to today.
pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
) -> Result<Json<UserView>> {
    let user_id = target(&claims, Some(user_id))?;
    let user = state.users.find(&user_id).await?;
    Ok(Json(view(&state, user)))
}

pub async fn ad_option(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<String>,
    Valid(body): Valid<AdOptionBody>,
) -> Result<Json<UserView>> {
    let user_id = caller(&claims, Some(user_id))?;
    let user = state.users.switch_option(&user_id, body.ad_option).await?;
    Ok(Json(view(&state, user)))
}

/// Stores the signals of the caller's device.
pub async fn device_info(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(device): Json<DeviceInfo>,
) -> Result<Json<DeviceInfo>> {
    let user = state.users.record_device(&claims.sub, device).await?;
    Ok(Json(user.device_info.unwrap_or_default()))
}
