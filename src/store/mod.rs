//! Persistence ports.
//!
//! Every method is one atomic unit of work. Methods that append a ledger
//! entry also move the cached `User.balance` by the same amount inside the
//! same unit, so the projection and the ledger cannot drift apart.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::Result;
use crate::model::{
    Ad, AdOption, CompletionStatus, DeviceInfo, Task, TaskCompletion, Transaction,
    TransactionType, User, Withdrawal, WithdrawalStatus,
};
use crate::settings::PlatformSettings;

/// Daily counters of a user, persisted together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaState {
    pub daily_ads_watched: u32,
    pub daily_ads_limit: u32,
    pub ad_option: AdOption,
    pub quota_day: NaiveDate,
}

impl From<&User> for QuotaState {
    fn from(user: &User) -> Self {
        Self {
            daily_ads_watched: user.daily_ads_watched,
            daily_ads_limit: user.daily_ads_limit,
            ad_option: user.ad_option,
            quota_day: user.quota_day,
        }
    }
}

impl QuotaState {
    pub fn apply(&self, user: &mut User) {
        user.daily_ads_watched = self.daily_ads_watched;
        user.daily_ads_limit = self.daily_ads_limit;
        user.ad_option = self.ad_option;
        user.quota_day = self.quota_day;
    }
}

/// Result of an idempotent append.
#[derive(Clone, Debug, PartialEq)]
pub enum Appended {
    /// The entry was written.
    Created(Transaction),
    /// An entry with the same key already existed and is returned as is.
    Duplicate(Transaction),
}

impl Appended {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Appended::Created(tx) | Appended::Duplicate(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            Appended::Created(tx) | Appended::Duplicate(tx) => tx,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Appended::Duplicate(_))
    }
}

/// Terminal transition of a pending withdrawal.
#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    pub withdrawal_id: String,
    pub status: WithdrawalStatus,
    pub processed_at: DateTime<Utc>,
    pub admin_notes: Option<String>,
}

/// Terminal transition of a pending task completion.
#[derive(Clone, Debug, PartialEq)]
pub struct Review {
    pub completion_id: String,
    pub status: CompletionStatus,
    pub reviewed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<User>>;

    async fn find_user_by_telegram(&self, telegram_id: &str) -> Result<Option<User>>;

    async fn insert_user(&self, user: &User) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn set_banned(&self, id: &str, banned: bool) -> Result<User>;

    async fn save_quota(&self, id: &str, quota: &QuotaState) -> Result<()>;

    /// Stores a tier change. Fails with `OptionLocked` when an ad view was
    /// counted on `quota.quota_day` meanwhile.
    async fn select_ad_option(&self, id: &str, quota: &QuotaState) -> Result<()>;

    async fn save_device_info(&self, id: &str, device: &DeviceInfo) -> Result<()>;

    /// Whether a user other than `except` reported this fingerprint.
    async fn fingerprint_in_use(&self, fingerprint: &str, except: &str) -> Result<bool>;

    async fn set_cached_balance(&self, id: &str, balance: Decimal) -> Result<()>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Ads in catalog order, optionally filtered by tier.
    async fn list_ads(&self, kind: Option<AdOption>) -> Result<Vec<Ad>>;

    async fn find_ad(&self, id: &str) -> Result<Option<Ad>>;

    async fn insert_ad(&self, ad: &Ad) -> Result<()>;

    async fn update_ad(&self, ad: &Ad) -> Result<()>;

    async fn delete_ad(&self, id: &str) -> Result<bool>;

    async fn list_tasks(&self) -> Result<Vec<Task>>;

    async fn find_task(&self, id: &str) -> Result<Option<Task>>;

    async fn insert_task(&self, task: &Task) -> Result<()>;

    async fn update_task(&self, task: &Task) -> Result<()>;

    async fn delete_task(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Appends unless an entry with the same `(related_entity_id, type)`
    /// exists. Entries without a related entity are always written.
    async fn append_transaction(&self, tx: Transaction) -> Result<Appended>;

    /// Appends an `ad_earning` entry and stores the consumed quota in one
    /// unit. Fails with a conflict when the persisted counter moved since
    /// `quota` was computed.
    async fn credit_ad_view(&self, tx: Transaction, quota: &QuotaState) -> Result<Appended>;

    async fn find_transaction(
        &self,
        related_entity_id: &str,
        kind: TransactionType,
    ) -> Result<Option<Transaction>>;

    /// Oldest first.
    async fn list_transactions(&self, user_id: Option<&str>) -> Result<Vec<Transaction>>;

    async fn sum_transactions(&self, user_id: &str) -> Result<Decimal>;

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal, tx: Transaction) -> Result<()>;

    async fn find_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>>;

    /// Newest first.
    async fn list_withdrawals(
        &self,
        user_id: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>>;

    /// Applies `settlement` only while the row is still pending.
    async fn settle_withdrawal(&self, settlement: &Settlement, tx: Transaction) -> Result<Withdrawal>;

    /// Fails with `SubmissionPending` when the user already has a pending
    /// completion for the task.
    async fn insert_completion(&self, completion: &TaskCompletion) -> Result<()>;

    async fn find_completion(&self, id: &str) -> Result<Option<TaskCompletion>>;

    /// Newest first.
    async fn list_completions(
        &self,
        user_id: Option<&str>,
        status: Option<CompletionStatus>,
    ) -> Result<Vec<TaskCompletion>>;

    /// Applies `review` only while the row is still pending review.
    async fn review_completion(
        &self,
        review: &Review,
        tx: Option<Transaction>,
    ) -> Result<TaskCompletion>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load_settings(&self) -> Result<Option<PlatformSettings>>;

    async fn save_settings(&self, settings: &PlatformSettings) -> Result<()>;
}

/// Every port at once. The engine only holds `Arc<dyn Store>`.
pub trait Store: UserRepository + CatalogRepository + LedgerRepository + SettingsRepository {}

impl<T> Store for T where T: UserRepository + CatalogRepository + LedgerRepository + SettingsRepository {}
