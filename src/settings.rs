//! Administrator-controlled platform settings.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::model::AdOption;
use crate::store::Store;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSettings {
    pub earning_per_ad1: Decimal,
    pub earning_per_ad2: Decimal,
    pub daily_limit1: u32,
    pub daily_limit2: u32,
    pub min_withdrawal: Decimal,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            earning_per_ad1: Decimal::new(1, 2),
            earning_per_ad2: Decimal::new(2, 2),
            daily_limit1: 50,
            daily_limit2: 100,
            min_withdrawal: Decimal::TEN,
        }
    }
}

impl PlatformSettings {
    pub fn daily_limit(&self, option: AdOption) -> u32 {
        match option {
            AdOption::Option1 => self.daily_limit1,
            AdOption::Option2 => self.daily_limit2,
        }
    }

    /// Default rate for new ads of a tier. Existing ads keep their own rate.
    pub fn earning_per_ad(&self, option: AdOption) -> Decimal {
        match option {
            AdOption::Option1 => self.earning_per_ad1,
            AdOption::Option2 => self.earning_per_ad2,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.earning_per_ad1 <= Decimal::ZERO || self.earning_per_ad2 <= Decimal::ZERO {
            return Err(ValidationError::InvalidSettings("earning per ad must be positive"));
        }
        if self.min_withdrawal <= Decimal::ZERO {
            return Err(ValidationError::InvalidSettings("minimum withdrawal must be positive"));
        }
        Ok(())
    }
}

/// Partial update sent by an administrator. Absent fields are kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub earning_per_ad1: Option<Decimal>,
    pub earning_per_ad2: Option<Decimal>,
    pub daily_limit1: Option<u32>,
    pub daily_limit2: Option<u32>,
    pub min_withdrawal: Option<Decimal>,
}

impl SettingsPatch {
    pub fn apply(self, current: PlatformSettings) -> PlatformSettings {
        PlatformSettings {
            earning_per_ad1: self.earning_per_ad1.unwrap_or(current.earning_per_ad1),
            earning_per_ad2: self.earning_per_ad2.unwrap_or(current.earning_per_ad2),
            daily_limit1: self.daily_limit1.unwrap_or(current.daily_limit1),
            daily_limit2: self.daily_limit2.unwrap_or(current.daily_limit2),
            min_withdrawal: self.min_withdrawal.unwrap_or(current.min_withdrawal),
        }
    }
}

/// Reads and writes settings through the store so every reader sees the
/// latest saved value.
#[derive(Clone)]
pub struct PlatformSettingsStore {
    store: Arc<dyn Store>,
    defaults: PlatformSettings,
}

impl PlatformSettingsStore {
    pub fn new(store: Arc<dyn Store>, defaults: PlatformSettings) -> Self {
        Self { store, defaults }
    }

    pub async fn get(&self) -> Result<PlatformSettings> {
        Ok(self
            .store
            .load_settings()
            .await?
            .unwrap_or_else(|| self.defaults.clone()))
    }

    pub async fn update(&self, patch: SettingsPatch) -> Result<PlatformSettings> {
        let settings = patch.apply(self.get().await?);
        settings.validate()?;

        self.store.save_settings(&settings).await?;
        tracing::info!(?settings, "platform settings updated");

        Ok(settings)
    }
}
