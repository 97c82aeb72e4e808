//! Withdrawal and task completion queues.

use axum::Json;
use axum::extract::{Path, Query, State};

use crate::dto::{CompletionQuery, ReasonBody, WithdrawalQuery};
use crate::error::Result;
use crate::model::{TaskCompletion, Withdrawal};
use crate::router::Valid;
use crate::AppState;

pub async fn withdrawals(
    State(state): State<AppState>,
    Query(query): Query<WithdrawalQuery>,
) -> Result<Json<Vec<Withdrawal>>> {
    Ok(Json(state.withdrawals.list(query.status).await?))
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
) -> Result<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.approve(&withdrawal_id, None).await?))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
    Valid(body): Valid<ReasonBody>,
) -> Result<Json<Withdrawal>> {
    Ok(Json(state.withdrawals.reject(&withdrawal_id, &body.reason).await?))
}

pub async fn completions(
    State(state): State<AppState>,
    Query(query): Query<CompletionQuery>,
) -> Result<Json<Vec<TaskCompletion>>> {
    Ok(Json(state.tasks.list(query.status).await?))
}

pub async fn approve_completion(
    State(state): State<AppState>,
    Path(completion_id): Path<String>,
) -> Result<Json<TaskCompletion>> {
    Ok(Json(state.tasks.approve(&completion_id, None).await?))
}

pub async fn reject_completion(
    State(state): State<AppState>,
    Path(completion_id): Path<String>,
    Valid(body): Valid<ReasonBody>,
) -> Result<Json<TaskCompletion>> {
    Ok(Json(state.tasks.reject(&completion_id, &body.reason).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use rust_decimal_macros::dec;
    use serde_json::json;

    use crate::catalog::NewTask;
    use crate::model::WithdrawalMethod;
    use crate::task::Submission;
    use crate::tests::{admin_token, json, login, state};
    use crate::withdrawal::WithdrawalRequest;
    use crate::{app, make_request};

    #[tokio::test]
    async fn test_approve_withdrawal_debits_once() {
        let state = state();
        let (user_id, _) = login(&state, "1").await;
        state.ledger.adjust(&user_id, dec!(20), "seed").await.unwrap();
        let withdrawal = state
            .withdrawals
            .request(
                &user_id,
                WithdrawalRequest {
                    amount: dec!(15),
                    method: WithdrawalMethod::Binance,
                    details: "binance-id".into(),
                },
            )
            .await
            .unwrap();
        let token = admin_token(&state);
        let app = app(state.clone());

        let pending = json(
            make_request(Some(&token), app.clone(), Method::GET, "/admin/withdrawals?status=pending", String::default())
                .await,
        )
        .await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let path = format!("/admin/withdrawals/{}/approve", withdrawal.id);
        for _ in 0..2 {
            let response = make_request(Some(&token), app.clone(), Method::POST, &path, String::default()).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json(response).await["status"], "approved");
        }
        assert_eq!(state.ledger.balance_of(&user_id).await.unwrap(), dec!(5));

        let path = format!("/admin/withdrawals/{}/reject", withdrawal.id);
        let body = json!({ "reason": "late" }).to_string();
        let response = make_request(Some(&token), app, Method::POST, &path, body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reject_completion_requires_reason() {
        let state = state();
        let (user_id, _) = login(&state, "1").await;
        let task = state
            .catalog
            .create_task(NewTask {
                title: "Follow".into(),
                earning: dec!(1),
                ..Default::default()
            })
            .await
            .unwrap();
        let completion = state
            .tasks
            .submit(
                &user_id,
                Submission {
                    task_id: task.id,
                    submission_details: "@alice".into(),
                },
            )
            .await
            .unwrap();
        let token = admin_token(&state);
        let app = app(state.clone());

        let path = format!("/admin/task-completions/{}/reject", completion.id);
        let response = make_request(Some(&token), app.clone(), Method::POST, &path, json!({}).to_string()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json!({ "reason": "no proof" }).to_string();
        let rejected = json(make_request(Some(&token), app, Method::POST, &path, body).await).await;
        assert_eq!(rejected["status"], "rejected");
        assert_eq!(rejected["reviewNotes"], "no proof");
        assert_eq!(state.ledger.balance_of(&user_id).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_approve_completion_credits() {
        let state = state();
        let (user_id, _) = login(&state, "1").await;
        let task = state
            .catalog
            .create_task(NewTask {
                title: "Follow".into(),
                earning: dec!(0.75),
                ..Default::default()
            })
            .await
            .unwrap();
        let completion = state
            .tasks
            .submit(
                &user_id,
                Submission {
                    task_id: task.id,
                    submission_details: "@alice".into(),
                },
            )
            .await
            .unwrap();
        let token = admin_token(&state);
        let app = app(state.clone());

        let path = format!("/admin/task-completions/{}/approve", completion.id);
        let response = make_request(Some(&token), app.clone(), Method::POST, &path, String::default()).await;
        assert_eq!(json(response).await["status"], "approved");

        let queue = json(
            make_request(
                Some(&token),
                app,
                Method::GET,
                "/admin/task-completions?status=pending_review",
                String::default(),
            )
            .await,
        )
        .await;
        assert!(queue.as_array().unwrap().is_empty());
        assert_eq!(state.users.find(&user_id).await.unwrap().balance, dec!(0.75));
    }
}
