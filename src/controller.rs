//! Client entry point. Owns who is logged in and hands that identity to
//! the workflows that need it.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, IdentityCache};
use crate::client::{AdminApi, ApiClient, Credentials, RewardApi};
use crate::dto::UserView;
use crate::error::{Error, Result};
use crate::identity::TelegramAuth;
use crate::session::AdViewSession;

#[derive(Clone, Debug, PartialEq)]
pub enum Identity {
    User(Box<UserView>),
    Admin { username: String },
}

/// Who is logged in. Exists between a successful login and the teardown.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionContext {
    pub identity: Identity,
    pub credentials: Credentials,
}

impl SessionContext {
    pub fn user(&self) -> Option<&UserView> {
        match &self.identity {
            Identity::User(user) => Some(user),
            Identity::Admin { .. } => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.credentials.is_admin
    }
}

pub struct SessionController {
    api: ApiClient,
    cache: IdentityCache,
    dwell: Duration,
    context: Option<SessionContext>,
}

impl SessionController {
    pub fn new(api: ApiClient, cache: IdentityCache, dwell: Duration) -> Self {
        Self {
            api,
            cache,
            dwell,
            context: None,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    /// Resumes the session found in the cache.
    ///
    /// A user is fetched again before being trusted. A rejected token tears
    /// the session down. Any other failure keeps the cached user, which
    /// stays stale.
    pub async fn restore(&mut self) -> Result<Option<&SessionContext>> {
        let Some(token) = self.cache.token() else {
            return Ok(None);
        };
        let credentials = Credentials {
            token,
            is_admin: self.cache.is_admin(),
        };
        self.api.set_credentials(Some(credentials.clone())).await;

        if credentials.is_admin {
            return match self.api.settings().await {
                Ok(_) => {
                    let username = self.cache.get(CacheKey::AdminUsername).unwrap_or_default();
                    self.init(Identity::Admin { username }, credentials);
                    Ok(self.context.as_ref())
                },
                Err(Error::Unauthorized) => {
                    self.teardown().await?;
                    Ok(None)
                },
                Err(err) => Err(err),
            };
        }

        let Some(cached) = self.cache.current_user() else {
            self.teardown().await?;
            return Ok(None);
        };

        match self.api.fetch_user(&cached.user.id).await {
            Ok(user) => {
                self.cache.refresh_user(&user).await?;
                self.init(Identity::User(Box::new(user)), credentials);
            },
            Err(Error::Unauthorized) => {
                tracing::info!(user_id = %cached.user.id, "cached session rejected");
                self.teardown().await?;
                return Ok(None);
            },
            Err(err) => {
                tracing::warn!(user_id = %cached.user.id, error = %err, "using cached user until the server answers");
                self.init(Identity::User(Box::new(cached)), credentials);
            },
        }
        Ok(self.context.as_ref())
    }

    pub async fn login_telegram(&mut self, auth: &TelegramAuth) -> Result<&SessionContext> {
        let login = self.api.telegram_login(auth).await?;
        self.cache.save_session(&login.token, false, Some(&login.user)).await?;

        let credentials = Credentials {
            token: login.token,
            is_admin: false,
        };
        Ok(self.init(Identity::User(Box::new(login.user)), credentials))
    }

    pub async fn login_admin(&mut self, username: &str, password: &str) -> Result<&SessionContext> {
        let session = self.api.admin_login(username, password).await?;
        self.cache.save_session(&session.token, session.is_admin, None).await?;
        self.cache.set(CacheKey::AdminUsername, &session.username)?;
        self.cache.persist().await?;

        let credentials = Credentials {
            token: session.token,
            is_admin: session.is_admin,
        };
        Ok(self.init(
            Identity::Admin {
                username: session.username,
            },
            credentials,
        ))
    }

    pub async fn logout(&mut self) -> Result<()> {
        self.teardown().await
    }

    /// Fetches the logged-in user again and updates the cache.
    pub async fn refresh(&mut self) -> Result<&UserView> {
        let user_id = self
            .context
            .as_ref()
            .and_then(SessionContext::user)
            .map(|user| user.user.id.clone())
            .ok_or(Error::Unauthorized)?;

        let user = match self.api.fetch_user(&user_id).await {
            Ok(user) => user,
            Err(Error::Unauthorized) => {
                self.teardown().await?;
                return Err(Error::Unauthorized);
            },
            Err(err) => return Err(err),
        };
        self.cache.refresh_user(&user).await?;

        let context = self.context.as_mut().ok_or(Error::Unauthorized)?;
        context.identity = Identity::User(Box::new(user));
        context.user().ok_or(Error::Unauthorized)
    }

    /// Ad view session for the logged-in user.
    pub fn ad_session(&self) -> Result<AdViewSession> {
        let user = self
            .context
            .as_ref()
            .and_then(SessionContext::user)
            .ok_or(Error::Unauthorized)?;
        let api: Arc<dyn RewardApi> = Arc::new(self.api.clone());
        Ok(AdViewSession::new(api, user.user.id.clone(), self.dwell))
    }

    fn init(&mut self, identity: Identity, credentials: Credentials) -> &SessionContext {
        tracing::debug!(is_admin = credentials.is_admin, "session started");
        self.context.insert(SessionContext {
            identity,
            credentials,
        })
    }

    async fn teardown(&mut self) -> Result<()> {
        self.context = None;
        self.api.logout().await;
        self.cache.clear().await?;
        tracing::debug!("session ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const DWELL: Duration = Duration::from_secs(10);

    fn cache_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("adearn-controller-{}", crate::model::new_id()))
            .join("identity.json")
    }

    async fn controller(path: &PathBuf) -> SessionController {
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        let cache = IdentityCache::load(path).await.unwrap();
        SessionController::new(api, cache, DWELL)
    }

    #[tokio::test]
    async fn test_empty_cache_restores_nothing() {
        let path = cache_path();
        let mut controller = controller(&path).await;

        assert!(controller.restore().await.unwrap().is_none());
        assert!(controller.context().is_none());
        assert!(matches!(controller.ad_session(), Err(Error::Unauthorized)));
        assert!(matches!(controller.refresh().await, Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn test_token_without_user_is_dropped() {
        let path = cache_path();
        let mut cache = IdentityCache::load(&path).await.unwrap();
        cache.save_session("jwt", false, None).await.unwrap();

        let mut controller = controller(&path).await;
        assert!(controller.restore().await.unwrap().is_none());
        assert!(controller.api().credentials().await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let path = cache_path();
        let mut cache = IdentityCache::load(&path).await.unwrap();
        cache.save_session("jwt", false, None).await.unwrap();

        let mut controller = controller(&path).await;
        controller
            .api()
            .set_credentials(Some(Credentials {
                token: "jwt".into(),
                is_admin: false,
            }))
            .await;

        controller.logout().await.unwrap();
        assert!(controller.api().credentials().await.is_none());
        assert!(controller.cache().token().is_none());
        assert!(!path.exists());
    }
}
