//! Ad listing and view crediting.

use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::dto::{AdQuery, UserQuery, ViewBody};
use crate::error::Result;
use crate::model::{Ad, AdOption, Transaction};
use crate::reward::CreditReceipt;
use crate::router::{Valid, caller, target};
use crate::token::Claims;
use crate::AppState;

/// Active ads of the requested tier, or of both tiers.
pub async fn list(State(state): State<AppState>, Query(query): Query<AdQuery>) -> Result<Json<Vec<Ad>>> {
    let ads = match query.kind {
        Some(kind) => state.catalog.active_ads(kind).await?,
        None => {
            let mut ads = state.catalog.active_ads(AdOption::Option1).await?;
            ads.extend(state.catalog.active_ads(AdOption::Option2).await?);
            ads
        },
    };
    Ok(Json(ads))
}

pub async fn view(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<ViewBody>,
) -> Result<Json<CreditReceipt>> {
    let user_id = caller(&claims, body.user_id)?;
    let receipt = state.rewards.credit(&user_id, &body.ad_id, body.view_id).await?;
    Ok(Json(receipt))
}

/// Credited views, newest first.
pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Transaction>>> {
    let user_id = target(&claims, query.user_id)?;
    Ok(Json(state.rewards.history(&user_id).await?))
}
