use axum::Json;
use axum::extract::{Path, State};

use crate::catalog::{AdPatch, NewAd, NewTask, TaskPatch};
use crate::dto::SuccessResponse;
use crate::error::Result;
use crate::model::{Ad, Task};
use crate::AppState;

/// Every ad, active or not.
pub async fn ads(State(state): State<AppState>) -> Result<Json<Vec<Ad>>> {
    Ok(Json(state.catalog.ads().await?))
}

pub async fn create_ad(State(state): State<AppState>, Json(body): Json<NewAd>) -> Result<Json<Ad>> {
    Ok(Json(state.catalog.create_ad(body).await?))
}

pub async fn update_ad(
    State(state): State<AppState>,
    Path(ad_id): Path<String>,
    Json(body): Json<AdPatch>,
) -> Result<Json<Ad>> {
    Ok(Json(state.catalog.update_ad(&ad_id, body).await?))
}

pub async fn delete_ad(State(state): State<AppState>, Path(ad_id): Path<String>) -> Result<Json<SuccessResponse>> {
    state.catalog.delete_ad(&ad_id).await?;
    Ok(Json(SuccessResponse::default()))
}

pub async fn tasks(State(state): State<AppState>) -> Result<Json<Vec<Task>>> {
    Ok(Json(state.catalog.tasks().await?))
}

pub async fn create_task(State(state): State<AppState>, Json(body): Json<NewTask>) -> Result<Json<Task>> {
    Ok(Json(state.catalog.create_task(body).await?))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<TaskPatch>,
) -> Result<Json<Task>> {
    Ok(Json(state.catalog.update_task(&task_id, body).await?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<SuccessResponse>> {
    state.catalog.delete_task(&task_id).await?;
    Ok(Json(SuccessResponse::default()))
}
