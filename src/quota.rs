//! Daily ad quota.
//!
//! Counters belong to the UTC day stored in `User::quota_day`. Reading a
//! user on a later day resets them and picks the limit of the current tier
//! from the settings in force at that moment.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Result, ValidationError};
use crate::model::{AdOption, User};
use crate::security;
use crate::settings::PlatformSettings;

#[derive(Clone)]
pub struct QuotaManager {
    clock: Arc<dyn Clock>,
}

impl QuotaManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Resets the counters when `user` still carries an older day.
    /// Returns whether a reset happened.
    pub fn roll_over(&self, user: &mut User, settings: &PlatformSettings) -> bool {
        let today = self.clock.today();
        if user.quota_day >= today {
            return false;
        }

        user.quota_day = today;
        user.daily_ads_watched = 0;
        user.daily_ads_limit = settings.daily_limit(user.ad_option);
        tracing::debug!(user_id = %user.id, %today, limit = user.daily_ads_limit, "daily quota reset");
        true
    }

    /// Refusal reason for one more view, if any.
    pub fn check(&self, user: &User, settings: &PlatformSettings) -> Result<()> {
        let mut user = user.clone();
        self.roll_over(&mut user, settings);

        security::ensure_allowed(&user)?;
        if user.daily_ads_watched >= user.daily_ads_limit {
            return Err(ValidationError::QuotaExhausted {
                limit: user.daily_ads_limit,
            }
            .into());
        }
        Ok(())
    }

    pub fn can_consume(&self, user: &User, settings: &PlatformSettings) -> bool {
        self.check(user, settings).is_ok()
    }

    /// Copy of `user` with one more view counted.
    pub fn record_consumption(&self, user: &User, settings: &PlatformSettings) -> Result<User> {
        self.check(user, settings)?;

        let mut user = user.clone();
        self.roll_over(&mut user, settings);
        user.daily_ads_watched += 1;
        Ok(user)
    }

    /// Copy of `user` on another tier. Only allowed before the first view of
    /// the day.
    pub fn switch_option(
        &self,
        user: &User,
        option: AdOption,
        settings: &PlatformSettings,
    ) -> Result<User> {
        let mut user = user.clone();
        self.roll_over(&mut user, settings);

        if user.daily_ads_watched > 0 && user.ad_option != option {
            return Err(ValidationError::OptionLocked.into());
        }

        user.ad_option = option;
        if user.daily_ads_watched == 0 {
            user.daily_ads_limit = settings.daily_limit(option);
        }
        Ok(user)
    }
}
