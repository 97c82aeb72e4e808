//! REST client of the adearn API.
//!
//! Every call maps a non-2xx answer to [`Error::Collaborator`] carrying the
//! reason given by the server, except 401 ([`Error::Unauthorized`]), 409
//! ([`Error::Conflict`]) and problems typed as a quota refusal, a blocked
//! account or another business rule the caller reacts to. Preconditions
//! that can be checked locally fail before any request is sent.

mod admin;

pub use admin::AdminApi;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::dto::{
    AdOptionBody, AdminLogin, AdminSession, LoginResponse, TaskCompleteBody, TaskCompleteResponse, UserView,
    ViewBody, WithdrawalBody, WithdrawalResponse,
};
use crate::error::{Error, Result, ValidationError};
use crate::identity::TelegramAuth;
use crate::model::{Ad, AdOption, DeviceInfo, Task, TaskCompletion, Transaction, Withdrawal, WithdrawalMethod};
use crate::reward::CreditReceipt;
use crate::settings::PlatformSettings;
use crate::withdrawal;

/// Calls an ad-view session depends on.
#[async_trait]
pub trait RewardApi: Send + Sync {
    async fn fetch_user(&self, user_id: &str) -> Result<UserView>;

    async fn fetch_settings(&self) -> Result<PlatformSettings>;

    /// Active ads of a tier, in catalog order.
    async fn fetch_ads(&self, kind: AdOption) -> Result<Vec<Ad>>;

    async fn view_ad(&self, user_id: &str, ad_id: &str, view_id: &str) -> Result<CreditReceipt>;

    async fn select_ad_option(&self, user_id: &str, option: AdOption) -> Result<UserView>;
}

/// Bearer token held by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub is_admin: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Scope {
    Public,
    User,
    Admin,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let url = url::Url::parse(base_url)
            .map_err(|err| Error::internal(format!("invalid API url `{base_url}`: {err}")))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base_url: url.as_str().trim_end_matches('/').to_owned(),
            credentials: Arc::default(),
        })
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.read().await.clone()
    }

    /// Replaces the bearer token, e.g. one restored from the identity cache.
    pub async fn set_credentials(&self, credentials: Option<Credentials>) {
        *self.credentials.write().await = credentials;
    }

    async fn request(&self, method: Method, path: &str, scope: Scope) -> Result<RequestBuilder> {
        let request = self.http.request(method, format!("{}{path}", self.base_url));
        if scope == Scope::Public {
            return Ok(request);
        }

        match self.credentials.read().await.as_ref() {
            Some(credentials) if scope == Scope::Admin && !credentials.is_admin => Err(Error::Unauthorized),
            Some(credentials) => Ok(request.bearer_auth(&credentials.token)),
            None => Err(Error::Unauthorized),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.bytes().await.unwrap_or_default();
        Err(failure(status, &body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, scope: Scope) -> Result<T> {
        self.send(self.request(Method::GET, path, scope).await?).await
    }

    async fn get_with<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
        scope: Scope,
    ) -> Result<T> {
        self.send(self.request(Method::GET, path, scope).await?.query(query))
            .await
    }

    async fn call<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        scope: Scope,
    ) -> Result<T> {
        self.send(self.request(method, path, scope).await?.json(body)).await
    }

    /// Exchanges a signed Telegram login for a user session.
    pub async fn telegram_login(&self, auth: &TelegramAuth) -> Result<LoginResponse> {
        let login: LoginResponse = self
            .call(Method::POST, "/auth/telegram-login", auth, Scope::Public)
            .await?;
        self.set_credentials(Some(Credentials {
            token: login.token.clone(),
            is_admin: false,
        }))
        .await;
        Ok(login)
    }

    pub async fn admin_login(&self, username: &str, password: &str) -> Result<AdminSession> {
        let body = AdminLogin {
            username: username.to_owned(),
            password: password.to_owned(),
        };
        let session: AdminSession = self.call(Method::POST, "/admin/login", &body, Scope::Public).await?;
        self.set_credentials(Some(Credentials {
            token: session.token.clone(),
            is_admin: session.is_admin,
        }))
        .await;
        Ok(session)
    }

    pub async fn logout(&self) {
        self.set_credentials(None).await;
    }

    pub async fn submit_device_info(&self, device: &DeviceInfo) -> Result<DeviceInfo> {
        self.call(Method::POST, "/user/device-info", device, Scope::User).await
    }

    pub async fn tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        self.get_with("/tasks", &[("userId", user_id)], Scope::User).await
    }

    pub async fn complete_task(&self, user_id: &str, task_id: &str, proof: &str) -> Result<TaskCompleteResponse> {
        if proof.trim().is_empty() {
            return Err(ValidationError::EmptyProof.into());
        }

        let body = TaskCompleteBody {
            task_id: task_id.to_owned(),
            user_id: Some(user_id.to_owned()),
            submission_details: proof.to_owned(),
        };
        self.call(Method::POST, "/tasks/complete", &body, Scope::User).await
    }

    pub async fn task_history(&self, user_id: &str) -> Result<Vec<TaskCompletion>> {
        self.get_with("/user/task-history", &[("userId", user_id)], Scope::User)
            .await
    }

    /// Checks the request against the last known balance and settings
    /// before sending it.
    pub async fn request_withdrawal(
        &self,
        user: &UserView,
        settings: &PlatformSettings,
        amount: Decimal,
        method: WithdrawalMethod,
        details: &str,
    ) -> Result<WithdrawalResponse> {
        withdrawal::validate_request(amount, details, user.user.balance, settings.min_withdrawal)?;

        let body = WithdrawalBody {
            user_id: Some(user.user.id.clone()),
            amount,
            method,
            details: details.trim().to_owned(),
        };
        self.call(Method::POST, "/withdrawal", &body, Scope::User).await
    }

    pub async fn withdrawals(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        self.get_with("/withdrawal", &[("userId", user_id)], Scope::User).await
    }

    /// Credited ad views, newest first.
    pub async fn ad_history(&self, user_id: &str) -> Result<Vec<Transaction>> {
        self.get_with("/ads/view/history", &[("userId", user_id)], Scope::User)
            .await
    }
}

#[async_trait]
impl RewardApi for ApiClient {
    async fn fetch_user(&self, user_id: &str) -> Result<UserView> {
        self.get(&format!("/user/{user_id}"), Scope::User).await
    }

    async fn fetch_settings(&self) -> Result<PlatformSettings> {
        self.get("/settings", Scope::User).await
    }

    async fn fetch_ads(&self, kind: AdOption) -> Result<Vec<Ad>> {
        self.get_with("/ads", &[("type", kind.as_str())], Scope::User).await
    }

    async fn view_ad(&self, user_id: &str, ad_id: &str, view_id: &str) -> Result<CreditReceipt> {
        let body = ViewBody {
            ad_id: ad_id.to_owned(),
            user_id: Some(user_id.to_owned()),
            view_id: Some(view_id.to_owned()),
        };
        self.call(Method::POST, "/ads/view", &body, Scope::User).await
    }

    async fn select_ad_option(&self, user_id: &str, option: AdOption) -> Result<UserView> {
        let body = AdOptionBody { ad_option: option };
        self.call(Method::PUT, &format!("/user/{user_id}/ad-option"), &body, Scope::User)
            .await
    }
}

/// Error for a non-2xx answer. A problem `type` the engine knows comes
/// back as the typed error. Otherwise the reason is the first non-empty
/// `detail`, `title` or `message` field of the body.
fn failure(status: StatusCode, body: &[u8]) -> Error {
    let body = serde_json::from_slice::<serde_json::Value>(body).unwrap_or_default();

    let typed = body.get("type").and_then(|kind| kind.as_str()).and_then(|kind| {
        let limit = body
            .get("limit")
            .and_then(|limit| limit.as_u64())
            .and_then(|limit| u32::try_from(limit).ok());
        Error::from_problem(kind, limit)
    });
    if let Some(err) = typed {
        return err;
    }

    let reason = ["detail", "title", "message"].iter().find_map(|key| {
        body.get(key)
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    });

    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized,
        StatusCode::CONFLICT => Error::Conflict(reason.unwrap_or_else(|| "conflicting request".to_owned())),
        status => Error::Collaborator {
            status: status.as_u16(),
            reason,
        },
    }
}
