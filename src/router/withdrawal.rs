use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::dto::{UserQuery, WithdrawalBody, WithdrawalResponse};
use crate::error::Result;
use crate::model::Withdrawal;
use crate::router::{Valid, caller, target};
use crate::token::Claims;
use crate::withdrawal::WithdrawalRequest;
use crate::AppState;

/// Files a payout request. The balance moves only on approval.
pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<WithdrawalBody>,
) -> Result<Json<WithdrawalResponse>> {
    let user_id = caller(&claims, body.user_id)?;
    let withdrawal = state
        .withdrawals
        .request(
            &user_id,
            WithdrawalRequest {
                amount: body.amount,
                method: body.method,
                details: body.details,
            },
        )
        .await?;

    Ok(Json(WithdrawalResponse {
        success: true,
        withdrawal_id: withdrawal.id,
    }))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Withdrawal>>> {
    let user_id = target(&claims, query.user_id)?;
    Ok(Json(state.withdrawals.list_for_user(&user_id).await?))
}
