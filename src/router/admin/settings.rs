use axum::Json;
use axum::extract::State;

use crate::error::Result;
use crate::settings::{PlatformSettings, SettingsPatch};
use crate::AppState;

/// Also served to users at `/settings`.
pub async fn get(State(state): State<AppState>) -> Result<Json<PlatformSettings>> {
    Ok(Json(state.settings.get().await?))
}

/// New limits apply at each user's next daily reset, new rates to ads
/// created afterwards.
pub async fn update(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<PlatformSettings>> {
    Ok(Json(state.settings.update(patch).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::tests::{admin_token, json, login, state};
    use crate::{app, make_request};

    #[tokio::test]
    async fn test_update_seen_by_users() {
        let state = state();
        let (user_id, user_token) = login(&state, "1").await;
        let token = admin_token(&state);
        let app = app(state);

        let body = json!({ "dailyLimit1": 3 }).to_string();
        let response = make_request(Some(&token), app.clone(), Method::PUT, "/admin/settings", body).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json(response).await["dailyLimit2"], 100);

        let settings =
            json(make_request(Some(&user_token), app.clone(), Method::GET, "/settings", String::default()).await).await;
        assert_eq!(settings["dailyLimit1"], 3);

        let user = json(
            make_request(Some(&user_token), app.clone(), Method::GET, &format!("/user/{user_id}"), String::default())
                .await,
        )
        .await;
        // Today's limit stays; the new one applies from the next reset.
        assert_eq!(user["dailyAdsLimit"], 50);

        let response =
            make_request(Some(&user_token), app, Method::PUT, "/admin/settings", json!({}).to_string()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_settings_refused() {
        let state = state();
        let token = admin_token(&state);
        let app = app(state);

        let body = json!({ "minWithdrawal": 0 }).to_string();
        let response = make_request(Some(&token), app, Method::PUT, "/admin/settings", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
