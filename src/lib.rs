//! adearn rewards users for watching ads and completing tasks, and pays
//! their balance out on administrator approval.

#![forbid(unsafe_code)]

pub mod cache;
pub mod catalog;
pub mod client;
pub mod clock;
pub mod config;
pub mod controller;
pub mod database;
pub mod dto;
pub mod error;
pub mod identity;
pub mod inflight;
pub mod ledger;
mod middleware;
pub mod model;
pub mod quota;
pub mod reconcile;
pub mod reward;
mod router;
pub mod security;
pub mod session;
pub mod settings;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod token;
pub mod user;
pub mod withdrawal;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post, put};
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::identity::{AdminVerifier, TelegramVerifier};
use crate::inflight::{InFlight, KeyedLock};
use crate::ledger::BalanceLedger;
use crate::quota::QuotaManager;
use crate::reward::RewardService;
use crate::settings::PlatformSettingsStore;
use crate::store::{MemoryStore, PgStore, Store};
use crate::task::TaskReviewWorkflow;
use crate::user::UserService;
use crate::withdrawal::WithdrawalWorkflow;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub token: token::TokenManager,
    pub telegram: Option<TelegramVerifier>,
    pub admin: Option<AdminVerifier>,
    pub users: UserService,
    pub catalog: Catalog,
    pub ledger: BalanceLedger,
    pub settings: PlatformSettingsStore,
    pub rewards: RewardService,
    pub withdrawals: WithdrawalWorkflow,
    pub tasks: TaskReviewWorkflow,
}

impl AppState {
    /// Wires every service on top of `store`.
    pub fn new(
        config: Arc<config::Configuration>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        token: token::TokenManager,
    ) -> Self {
        let locks = KeyedLock::default();
        let inflight = InFlight::default();

        let settings = PlatformSettingsStore::new(store.clone(), config.defaults.clone());
        let quota = QuotaManager::new(clock.clone());
        let users = UserService::new(
            store.clone(),
            quota.clone(),
            settings.clone(),
            clock.clone(),
            locks.clone(),
        );
        let catalog = Catalog::new(store.clone(), settings.clone(), clock.clone());
        let ledger = BalanceLedger::new(store.clone(), clock.clone());
        let rewards = RewardService::new(
            store.clone(),
            users.clone(),
            catalog.clone(),
            ledger.clone(),
            quota,
            settings.clone(),
            locks.clone(),
        );
        let withdrawals = WithdrawalWorkflow::new(
            store.clone(),
            users.clone(),
            ledger.clone(),
            settings.clone(),
            locks,
            inflight.clone(),
            clock.clone(),
        );
        let tasks = TaskReviewWorkflow::new(
            store,
            users.clone(),
            catalog.clone(),
            ledger.clone(),
            inflight,
            clock.clone(),
        );

        Self {
            telegram: config
                .telegram
                .as_ref()
                .map(|telegram| TelegramVerifier::new(telegram, clock)),
            admin: config.admin.as_ref().map(AdminVerifier::new),
            config,
            token,
            users,
            catalog,
            ledger,
            settings,
            rewards,
            withdrawals,
            tasks,
        }
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let user_router = Router::new()
        // `GET /user/{id}` goes to `get`.
        .route("/user/{user_id}", get(router::user::get))
        .route("/user/{user_id}/ad-option", put(router::user::ad_option))
        .route("/user/device-info", post(router::user::device_info))
        .route("/user/task-history", get(router::tasks::history))
        .route("/ads", get(router::ads::list))
        .route("/ads/view", post(router::ads::view))
        .route("/ads/view/history", get(router::ads::history))
        .route("/tasks", get(router::tasks::available))
        .route("/tasks/complete", post(router::tasks::complete))
        .route("/withdrawal", post(router::withdrawal::create).get(router::withdrawal::list))
        .route("/settings", get(router::admin::settings::get))
        .route_layer(AxumMiddleware::from_fn_with_state(state.clone(), middleware::auth));

    let admin_router = Router::new()
        .route("/users", get(router::admin::users::list))
        .route("/users/{user_id}", get(router::admin::users::get))
        .route("/users/{user_id}/ban", post(router::admin::users::ban))
        .route("/users/{user_id}/unban", post(router::admin::users::unban))
        .route("/users/{user_id}/adjust", post(router::admin::users::adjust))
        .route("/users/{user_id}/audit", get(router::admin::users::audit))
        .route("/ads", get(router::admin::catalog::ads).post(router::admin::catalog::create_ad))
        .route(
            "/ads/{ad_id}",
            put(router::admin::catalog::update_ad).delete(router::admin::catalog::delete_ad),
        )
        .route("/tasks", get(router::admin::catalog::tasks).post(router::admin::catalog::create_task))
        .route(
            "/tasks/{task_id}",
            put(router::admin::catalog::update_task).delete(router::admin::catalog::delete_task),
        )
        .route("/withdrawals", get(router::admin::review::withdrawals))
        .route("/withdrawals/{withdrawal_id}/approve", post(router::admin::review::approve_withdrawal))
        .route("/withdrawals/{withdrawal_id}/reject", post(router::admin::review::reject_withdrawal))
        .route("/task-completions", get(router::admin::review::completions))
        .route("/task-completions/{completion_id}/approve", post(router::admin::review::approve_completion))
        .route("/task-completions/{completion_id}/reject", post(router::admin::review::reject_completion))
        .route("/transactions", get(router::admin::users::transactions))
        .route("/settings", get(router::admin::settings::get).put(router::admin::settings::update))
        .route_layer(AxumMiddleware::from_fn(middleware::require_admin))
        .route_layer(AxumMiddleware::from_fn_with_state(state.clone(), middleware::auth));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `POST /auth/telegram-login` goes to `telegram`.
        .route("/auth/telegram-login", post(router::auth::telegram))
        .route("/admin/login", post(router::auth::admin))
        .merge(user_router)
        .nest("/admin", admin_router)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState> {
    // read configuration file. let it in memory.
    let config = config::Configuration::default()
        .path_from_env()
        .read()
        .map_err(|err| Error::internal(format!("invalid `url` in configuration: {err}")))?;

    let store: Arc<dyn Store> = match config.postgres {
        Some(ref postgres) => {
            let db = database::Database::from_config(postgres).await?;
            Arc::new(PgStore::new(&db))
        },
        None => {
            tracing::warn!("missing `postgres` entry on `config.yaml` file, data is kept in memory");
            Arc::new(MemoryStore::default())
        },
    };

    // handle jwt.
    let Some(token_config) = &config.token else {
        return Err(Error::internal("missing `token` entry on `config.yaml` file"));
    };
    let mut token = token::TokenManager::new(
        &config.url,
        &token_config.public_key_pem,
        &token_config.private_key_pem,
    )?;
    if let Some(audience) = &token_config.audience {
        token.audience(audience);
    }

    if config.telegram.is_none() {
        tracing::warn!("missing `telegram` entry on `config.yaml` file, user login is disabled");
    }
    if config.admin.is_none() {
        tracing::warn!("missing `admin` entry on `config.yaml` file, admin login is disabled");
    }

    Ok(AppState::new(config, store, Arc::new(SystemClock), token))
}

#[cfg(test)]
pub(crate) mod tests {
    use argon2::Argon2;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use http_body_util::BodyExt;
    use rand::rngs::OsRng;

    use super::*;

    pub const BOT_TOKEN: &str = "123456:ABC-DEF";
    pub const ADMIN_PASSWORD: &str = "correct horse";

    /// State on the in-memory store with a known bot token and admin.
    pub fn state() -> AppState {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(ADMIN_PASSWORD.as_bytes(), &salt)
            .unwrap()
            .to_string();

        let mut config = config::Configuration::default();
        config.url = "https://earn.example.com/".into();
        config.telegram = Some(config::Telegram {
            bot_token: BOT_TOKEN.into(),
            max_auth_age_secs: 3600,
        });
        config.admin = Some(config::Admin {
            username: "root".into(),
            password_hash,
        });

        AppState::new(
            Arc::new(config),
            Arc::new(MemoryStore::default()),
            Arc::new(SystemClock),
            token::tests::manager(),
        )
    }

    pub fn admin_token(state: &AppState) -> String {
        state.token.create("root", true).unwrap()
    }

    /// Logs a Telegram user in and returns its id and token.
    pub async fn login(state: &AppState, telegram_id: &str) -> (String, String) {
        let user = state.users.login(telegram_id, "tester").await.unwrap();
        let token = state.token.create(&user.id, false).unwrap();
        (user.id, token)
    }

    pub async fn json(response: axum::http::Response<axum::body::Body>) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_is_public() {
        let app = app(state());
        let response = make_request(None, app, Method::GET, "/status.json", String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_user_routes_require_token() {
        let state = state();
        let (user_id, _) = login(&state, "42").await;
        let app = app(state);

        let path = format!("/user/{user_id}");
        let response = make_request(None, app.clone(), Method::GET, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(Some("garbage"), app, Method::GET, &path, String::default()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_claim() {
        let state = state();
        let (_, token) = login(&state, "42").await;
        let admin = admin_token(&state);
        let app = app(state);

        let response =
            make_request(Some(&token), app.clone(), Method::GET, "/admin/users", String::default()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(Some(&admin), app, Method::GET, "/admin/users", String::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
