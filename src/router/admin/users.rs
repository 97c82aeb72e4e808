use axum::Json;
use axum::extract::{Path, Query, State};

use crate::dto::{AdjustBody, UserQuery, UserView};
use crate::error::Result;
use crate::ledger::Audit;
use crate::model::{Transaction, User};
use crate::router::Valid;
use crate::AppState;

fn view(state: &AppState, user: User) -> UserView {
    UserView {
        security_status: state.users.security(&user),
        user,
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<UserView>>> {
    let users = state.users.list().await?;
    Ok(Json(users.into_iter().map(|user| view(&state, user)).collect()))
}

pub async fn get(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<UserView>> {
    let user = state.users.find(&user_id).await?;
    Ok(Json(view(&state, user)))
}

pub async fn ban(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<UserView>> {
    let user = state.users.set_banned(&user_id, true).await?;
    Ok(Json(view(&state, user)))
}

pub async fn unban(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<UserView>> {
    let user = state.users.set_banned(&user_id, false).await?;
    Ok(Json(view(&state, user)))
}

/// Writes an `admin_adjustment` entry. Negative amounts debit.
pub async fn adjust(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Valid(body): Valid<AdjustBody>,
) -> Result<Json<Transaction>> {
    Ok(Json(state.ledger.adjust(&user_id, body.amount, &body.reason).await?))
}

pub async fn audit(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<Audit>> {
    Ok(Json(state.ledger.audit(&user_id).await?))
}

/// Ledger entries, of one user when `userId` is given.
pub async fn transactions(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Transaction>>> {
    let transactions = match query.user_id {
        Some(user_id) => state.ledger.history(&user_id).await?,
        None => state.ledger.all().await?,
    };
    Ok(Json(transactions))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::tests::{admin_token, json, login, state};
    use crate::{app, make_request};

    #[tokio::test]
    async fn test_ban_blocks_then_unban_restores() {
        let state = state();
        let (user_id, _) = login(&state, "1").await;
        let token = admin_token(&state);
        let app = app(state);

        let path = format!("/admin/users/{user_id}/ban");
        let banned = json(make_request(Some(&token), app.clone(), Method::POST, &path, String::default()).await).await;
        assert_eq!(banned["isBanned"], true);
        assert_eq!(banned["securityStatus"]["status"], "Blocked");

        let path = format!("/admin/users/{user_id}/unban");
        let restored = json(make_request(Some(&token), app, Method::POST, &path, String::default()).await).await;
        assert_eq!(restored["securityStatus"]["status"], "Safe");
    }

    #[tokio::test]
    async fn test_adjust_and_audit() {
        let state = state();
        let (user_id, _) = login(&state, "1").await;
        let token = admin_token(&state);
        let app = app(state);

        let path = format!("/admin/users/{user_id}/adjust");
        let body = json!({ "amount": 3, "reason": "" }).to_string();
        let response = make_request(Some(&token), app.clone(), Method::POST, &path, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json!({ "amount": 3, "reason": "support refund" }).to_string();
        let tx = json(make_request(Some(&token), app.clone(), Method::POST, &path, body).await).await;
        assert_eq!(tx["type"], "admin_adjustment");

        let path = format!("/admin/users/{user_id}/audit");
        let audit = json(make_request(Some(&token), app.clone(), Method::GET, &path, String::default()).await).await;
        assert_eq!(audit["derived"], json!(3.0));
        assert_eq!(audit["repaired"], false);

        let path = format!("/admin/transactions?userId={user_id}");
        let all = json(make_request(Some(&token), app, Method::GET, &path, String::default()).await).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
    }
}
