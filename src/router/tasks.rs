use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::dto::{TaskCompleteBody, TaskCompleteResponse, UserQuery};
use crate::error::Result;
use crate::model::{Task, TaskCompletion};
use crate::router::{Valid, caller, target};
use crate::task::Submission;
use crate::token::Claims;
use crate::AppState;

/// Tasks the user can still submit proof for.
pub async fn available(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<Task>>> {
    let user_id = target(&claims, query.user_id)?;
    Ok(Json(state.tasks.available(&user_id).await?))
}

/// Submits proof. The reward is credited once an administrator approves.
pub async fn complete(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<TaskCompleteBody>,
) -> Result<Json<TaskCompleteResponse>> {
    let user_id = caller(&claims, body.user_id)?;
    let task_completion = state
        .tasks
        .submit(
            &user_id,
            Submission {
                task_id: body.task_id,
                submission_details: body.submission_details,
            },
        )
        .await?;
    let user = state.users.find(&user_id).await?;

    Ok(Json(TaskCompleteResponse {
        success: true,
        new_balance: user.balance,
        task_completion,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<UserQuery>,
) -> Result<Json<Vec<TaskCompletion>>> {
    let user_id = target(&claims, query.user_id)?;
    Ok(Json(state.tasks.history(&user_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use rust_decimal_macros::dec;
    use serde_json::json;

    use crate::catalog::NewTask;
    use crate::tests::{json, login, state};
    use crate::{app, make_request};

    #[tokio::test]
    async fn test_submit_then_hidden_from_available() {
        let state = state();
        let (_, token) = login(&state, "1").await;
        let task = state
            .catalog
            .create_task(NewTask {
                title: "Join channel".into(),
                earning: dec!(0.5),
                ..Default::default()
            })
            .await
            .unwrap();
        let app = app(state);

        let listed = json(make_request(Some(&token), app.clone(), Method::GET, "/tasks", String::default()).await).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let body = json!({ "taskId": task.id, "submissionDetails": "@alice" }).to_string();
        let response = make_request(Some(&token), app.clone(), Method::POST, "/tasks/complete", body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["newBalance"], json!(0.0));
        assert_eq!(body["taskCompletion"]["status"], "pending_review");

        let listed = json(make_request(Some(&token), app.clone(), Method::GET, "/tasks", String::default()).await).await;
        assert!(listed.as_array().unwrap().is_empty());

        let history =
            json(make_request(Some(&token), app, Method::GET, "/user/task-history", String::default()).await).await;
        assert_eq!(history[0]["taskId"], task.id.as_str());
    }

    #[tokio::test]
    async fn test_empty_proof_refused() {
        let state = state();
        let (_, token) = login(&state, "1").await;
        let task = state
            .catalog
            .create_task(NewTask {
                title: "Join channel".into(),
                earning: dec!(0.5),
                ..Default::default()
            })
            .await
            .unwrap();
        let app = app(state);

        let body = json!({ "taskId": task.id, "submissionDetails": "   " }).to_string();
        let response = make_request(Some(&token), app, Method::POST, "/tasks/complete", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
