//! Typed builder for a new [`User`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::model::{AdOption, User, new_id};
use crate::settings::PlatformSettings;

/// [`User`] builder. A user cannot be built without its external identity.
#[derive(Debug, Clone)]
pub struct UserBuilder<TelegramId> {
    telegram_id: TelegramId,
    username: String,
    ad_option: AdOption,
}

/// Value is missing on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Missing;

/// Value is present on [`UserBuilder`].
#[derive(Debug, Clone)]
pub struct Present<T>(pub T);

impl Default for UserBuilder<Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl UserBuilder<Missing> {
    pub fn new() -> Self {
        Self {
            telegram_id: Missing,
            username: String::default(),
            ad_option: AdOption::default(),
        }
    }

    /// Update `telegram_id` field on [`UserBuilder`].
    pub fn telegram_id(self, telegram_id: impl ToString) -> UserBuilder<Present<String>> {
        UserBuilder {
            telegram_id: Present(telegram_id.to_string()),
            username: self.username,
            ad_option: self.ad_option,
        }
    }
}

impl<TelegramId> UserBuilder<TelegramId> {
    /// Update `username` field on [`UserBuilder`].
    pub fn username(mut self, username: impl ToString) -> Self {
        self.username = username.to_string();
        self
    }

    /// Update `ad_option` field on [`UserBuilder`].
    pub fn ad_option(mut self, ad_option: AdOption) -> Self {
        self.ad_option = ad_option;
        self
    }
}

impl UserBuilder<Present<String>> {
    /// Build a [`User`] with a zero balance and a fresh quota for the day of
    /// `now`.
    pub fn build(self, settings: &PlatformSettings, now: DateTime<Utc>) -> User {
        let username = if self.username.is_empty() {
            format!("user{}", self.telegram_id.0)
        } else {
            self.username
        };

        User {
            id: new_id(),
            telegram_id: self.telegram_id.0,
            username,
            balance: Decimal::ZERO,
            daily_ads_watched: 0,
            daily_ads_limit: settings.daily_limit(self.ad_option),
            ad_option: self.ad_option,
            quota_day: now.date_naive(),
            is_banned: false,
            is_admin: false,
            device_info: None,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_takes_tier_limit() {
        let now = Utc::now();
        let user = UserBuilder::new()
            .username("bob")
            .telegram_id(77)
            .ad_option(AdOption::Option2)
            .build(&PlatformSettings::default(), now);

        assert_eq!(user.telegram_id, "77");
        assert_eq!(user.username, "bob");
        assert_eq!(user.daily_ads_limit, 100);
        assert_eq!(user.quota_day, now.date_naive());
        assert!(user.balance.is_zero());
    }

    #[test]
    fn test_missing_username_falls_back_to_identity() {
        let user = UserBuilder::new()
            .telegram_id("5")
            .build(&PlatformSettings::default(), Utc::now());
        assert_eq!(user.username, "user5");
    }
}
