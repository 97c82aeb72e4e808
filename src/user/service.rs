use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::inflight::KeyedLock;
use crate::model::{AdOption, DeviceInfo, User};
use crate::quota::QuotaManager;
use crate::security::{self, SecuritySignals, SecurityStatus};
use crate::settings::PlatformSettingsStore;
use crate::store::{QuotaState, Store};
use crate::user::UserBuilder;

/// User manager.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn Store>,
    quota: QuotaManager,
    settings: PlatformSettingsStore,
    clock: Arc<dyn Clock>,
    locks: KeyedLock,
}

impl UserService {
    pub fn new(
        store: Arc<dyn Store>,
        quota: QuotaManager,
        settings: PlatformSettingsStore,
        clock: Arc<dyn Clock>,
        locks: KeyedLock,
    ) -> Self {
        Self {
            store,
            quota,
            settings,
            clock,
            locks,
        }
    }

    /// Loads a user with counters rolled to the current day.
    pub async fn find(&self, id: &str) -> Result<User> {
        let mut user = self
            .store
            .find_user(id)
            .await?
            .ok_or(Error::not_found("user"))?;

        let settings = self.settings.get().await?;
        if self.quota.roll_over(&mut user, &settings) {
            self.store.save_quota(&user.id, &QuotaState::from(&user)).await?;
        }
        Ok(user)
    }

    /// Returns the user bound to a verified Telegram identity, creating it
    /// on first login.
    pub async fn login(&self, telegram_id: &str, username: &str) -> Result<User> {
        if let Some(user) = self.store.find_user_by_telegram(telegram_id).await? {
            return self.find(&user.id).await;
        }

        let settings = self.settings.get().await?;
        let user = UserBuilder::new()
            .telegram_id(telegram_id)
            .username(username)
            .build(&settings, self.clock.now());

        match self.store.insert_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, %telegram_id, "user created on first login");
                Ok(user)
            },
            // Lost a race with a concurrent first login.
            Err(Error::Conflict(_)) => self
                .store
                .find_user_by_telegram(telegram_id)
                .await?
                .ok_or(Error::not_found("user")),
            Err(err) => Err(err),
        }
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        self.store.list_users().await
    }

    /// Selects the ad tier of the day. Serialized with ad credits of the
    /// same user, and refused once one was counted.
    pub async fn switch_option(&self, id: &str, option: AdOption) -> Result<User> {
        let _guard = self.locks.lock(id).await;
        let current = self.find(id).await?;
        let settings = self.settings.get().await?;

        let user = self.quota.switch_option(&current, option, &settings)?;
        if user.daily_ads_watched > 0 {
            // Same tier selected again, nothing to store.
            return Ok(user);
        }
        self.store.select_ad_option(&user.id, &QuotaState::from(&user)).await?;

        tracing::info!(user_id = %user.id, ad_option = %option, limit = user.daily_ads_limit, "ad option selected");
        Ok(user)
    }

    /// Stores the signals reported by the user's device. A fingerprint
    /// already reported by another user sets the multiple-accounts flag.
    pub async fn record_device(&self, id: &str, mut device: DeviceInfo) -> Result<User> {
        let mut user = self.find(id).await?;

        device.multiple_accounts_detected = device.multiple_accounts_detected
            || (!device.device_fingerprint.is_empty()
                && self
                    .store
                    .fingerprint_in_use(&device.device_fingerprint, id)
                    .await?);
        device.last_login_at = Some(self.clock.now());
        device.blocked_attempts = user
            .device_info
            .as_ref()
            .map(|d| d.blocked_attempts)
            .unwrap_or_default();

        self.store.save_device_info(id, &device).await?;
        if device.multiple_accounts_detected {
            tracing::warn!(user_id = %id, fingerprint = %device.device_fingerprint, "device shared with another account");
        }

        user.device_info = Some(device);
        Ok(user)
    }

    pub async fn set_banned(&self, id: &str, banned: bool) -> Result<User> {
        let user = self.store.set_banned(id, banned).await?;
        tracing::info!(user_id = %id, banned, "ban flag updated");
        Ok(user)
    }

    pub fn security(&self, user: &User) -> SecurityStatus {
        security::evaluate(&SecuritySignals::from(user))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone, Utc};

    use super::*;
    use crate::clock::FixedClock;
    use crate::error::ValidationError;
    use crate::security::SecurityLevel;
    use crate::settings::PlatformSettings;
    use crate::store::{MemoryStore, UserRepository};

    fn service() -> (Arc<MemoryStore>, Arc<FixedClock>, UserService) {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap(),
        ));
        let settings = PlatformSettingsStore::new(store.clone(), PlatformSettings::default());
        let service = UserService::new(
            store.clone(),
            QuotaManager::new(clock.clone()),
            settings,
            clock.clone(),
            KeyedLock::default(),
        );
        (store, clock, service)
    }

    #[tokio::test]
    async fn test_login_creates_once() {
        let (_, _, service) = service();

        let first = service.login("42", "alice").await.unwrap();
        let second = service.login("42", "alice").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.daily_ads_limit, 50);
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_find_persists_day_roll() {
        let (store, clock, service) = service();
        let user = service.login("42", "alice").await.unwrap();
        let mut quota = QuotaState::from(&user);
        quota.daily_ads_watched = 50;
        store.save_quota(&user.id, &quota).await.unwrap();

        clock.advance(TimeDelta::days(1));
        let user = service.find(&user.id).await.unwrap();
        assert_eq!(user.daily_ads_watched, 0);

        let stored = store.find_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.quota_day, clock.today());
    }

    #[tokio::test]
    async fn test_shared_fingerprint_flags_second_account() {
        let (_, _, service) = service();
        let alice = service.login("1", "alice").await.unwrap();
        let bob = service.login("2", "bob").await.unwrap();
        let device = DeviceInfo {
            device_fingerprint: "fp-1".into(),
            ..Default::default()
        };

        let alice = service.record_device(&alice.id, device.clone()).await.unwrap();
        assert!(!alice.device_info.unwrap().multiple_accounts_detected);

        let bob = service.record_device(&bob.id, device).await.unwrap();
        assert!(bob.device_info.as_ref().unwrap().multiple_accounts_detected);
        assert_eq!(service.security(&bob).status, SecurityLevel::Warning);
    }

    #[tokio::test]
    async fn test_ban_blocks() {
        let (_, _, service) = service();
        let user = service.login("1", "alice").await.unwrap();

        let user = service.set_banned(&user.id, true).await.unwrap();
        assert!(service.security(&user).is_blocked());

        let user = service.set_banned(&user.id, false).await.unwrap();
        assert!(!service.security(&user).is_blocked());
    }

    #[tokio::test]
    async fn test_switch_option_before_first_view() {
        let (store, _, service) = service();
        let user = service.login("1", "alice").await.unwrap();

        let user = service.switch_option(&user.id, AdOption::Option2).await.unwrap();
        assert_eq!((user.ad_option, user.daily_ads_limit), (AdOption::Option2, 100));

        let stored = store.find_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.ad_option, AdOption::Option2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_waits_for_credit_of_same_user() {
        let store = Arc::new(MemoryStore::default());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap(),
        ));
        let locks = KeyedLock::default();
        let service = UserService::new(
            store.clone(),
            QuotaManager::new(clock.clone()),
            PlatformSettingsStore::new(store.clone(), PlatformSettings::default()),
            clock,
            locks.clone(),
        );
        let user = service.login("1", "alice").await.unwrap();

        // A credit of this user is being written.
        let credit = locks.lock(&user.id).await;
        let switch = {
            let service = service.clone();
            let id = user.id.clone();
            tokio::spawn(async move { service.switch_option(&id, AdOption::Option2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!switch.is_finished());

        let mut quota = QuotaState::from(&user);
        quota.daily_ads_watched = 1;
        store.save_quota(&user.id, &quota).await.unwrap();
        drop(credit);

        assert!(matches!(
            switch.await.unwrap(),
            Err(Error::Validation(ValidationError::OptionLocked))
        ));
        let stored = store.find_user(&user.id).await.unwrap().unwrap();
        assert_eq!(
            (stored.ad_option, stored.daily_ads_watched, stored.daily_ads_limit),
            (AdOption::Option1, 1, 50)
        );
    }
}
