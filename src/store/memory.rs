//! In-process store. Used when no PostgreSQL instance is configured and by
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{
    Appended, CatalogRepository, LedgerRepository, QuotaState, Review, SettingsRepository,
    Settlement, UserRepository,
};
use crate::error::{Error, Result, ValidationError};
use crate::model::{
    Ad, AdOption, CompletionStatus, DeviceInfo, Task, TaskCompletion, Transaction,
    TransactionType, User, Withdrawal, WithdrawalStatus,
};
use crate::settings::PlatformSettings;

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    ads: Vec<Ad>,
    tasks: Vec<Task>,
    transactions: Vec<Transaction>,
    /// `(related_entity_id, type)` to index in `transactions`.
    keys: HashMap<(String, TransactionType), usize>,
    withdrawals: Vec<Withdrawal>,
    completions: Vec<TaskCompletion>,
    settings: Option<PlatformSettings>,
}

impl State {
    fn user_mut(&mut self, id: &str) -> Result<&mut User> {
        self.users.get_mut(id).ok_or(Error::not_found("user"))
    }

    fn existing(&self, tx: &Transaction) -> Option<&Transaction> {
        let key = tx.related_entity_id.clone()?;
        self.keys
            .get(&(key, tx.kind))
            .and_then(|index| self.transactions.get(*index))
    }

    /// Writes `tx` and moves the cached balance. Caller checked for
    /// duplicates.
    fn push(&mut self, tx: Transaction) -> Result<Transaction> {
        self.user_mut(&tx.user_id)?.balance += tx.amount;

        if let Some(key) = &tx.related_entity_id {
            self.keys
                .insert((key.clone(), tx.kind), self.transactions.len());
        }
        self.transactions.push(tx.clone());
        Ok(tx)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn find_user_by_telegram(&self, telegram_id: &str) -> Result<Option<User>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .values()
            .find(|user| user.telegram_id == telegram_id)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.id == user.id || u.telegram_id == user.telegram_id) {
            return Err(Error::Conflict("user already exists".into()));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let mut users: Vec<User> = self.state.read().await.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn set_banned(&self, id: &str, banned: bool) -> Result<User> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        user.is_banned = banned;
        Ok(user.clone())
    }

    async fn save_quota(&self, id: &str, quota: &QuotaState) -> Result<()> {
        let mut state = self.state.write().await;
        quota.apply(state.user_mut(id)?);
        Ok(())
    }

    async fn select_ad_option(&self, id: &str, quota: &QuotaState) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state.user_mut(id)?;
        if user.quota_day == quota.quota_day && user.daily_ads_watched > 0 {
            return Err(ValidationError::OptionLocked.into());
        }
        quota.apply(user);
        Ok(())
    }

    async fn save_device_info(&self, id: &str, device: &DeviceInfo) -> Result<()> {
        let mut state = self.state.write().await;
        state.user_mut(id)?.device_info = Some(device.clone());
        Ok(())
    }

    async fn fingerprint_in_use(&self, fingerprint: &str, except: &str) -> Result<bool> {
        Ok(self.state.read().await.users.values().any(|user| {
            user.id != except
                && user
                    .device_info
                    .as_ref()
                    .is_some_and(|d| d.device_fingerprint == fingerprint)
        }))
    }

    async fn set_cached_balance(&self, id: &str, balance: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        state.user_mut(id)?.balance = balance;
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn list_ads(&self, kind: Option<AdOption>) -> Result<Vec<Ad>> {
        Ok(self
            .state
            .read()
            .await
            .ads
            .iter()
            .filter(|ad| kind.is_none_or(|kind| ad.kind == kind))
            .cloned()
            .collect())
    }

    async fn find_ad(&self, id: &str) -> Result<Option<Ad>> {
        Ok(self.state.read().await.ads.iter().find(|ad| ad.id == id).cloned())
    }

    async fn insert_ad(&self, ad: &Ad) -> Result<()> {
        self.state.write().await.ads.push(ad.clone());
        Ok(())
    }

    async fn update_ad(&self, ad: &Ad) -> Result<()> {
        let mut state = self.state.write().await;
        let current = state
            .ads
            .iter_mut()
            .find(|a| a.id == ad.id)
            .ok_or(Error::not_found("ad"))?;
        *current = ad.clone();
        Ok(())
    }

    async fn delete_ad(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.ads.len();
        state.ads.retain(|ad| ad.id != id);
        Ok(state.ads.len() != before)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.state.read().await.tasks.clone())
    }

    async fn find_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.state.read().await.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        self.state.write().await.tasks.push(task.clone());
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut state = self.state.write().await;
        let current = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or(Error::not_found("task"))?;
        *current = task.clone();
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|task| task.id != id);
        Ok(state.tasks.len() != before)
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn append_transaction(&self, tx: Transaction) -> Result<Appended> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.existing(&tx) {
            return Ok(Appended::Duplicate(existing.clone()));
        }
        Ok(Appended::Created(state.push(tx)?))
    }

    async fn credit_ad_view(&self, tx: Transaction, quota: &QuotaState) -> Result<Appended> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.existing(&tx) {
            return Ok(Appended::Duplicate(existing.clone()));
        }

        let user = state.user_mut(&tx.user_id)?;
        let moved = user.quota_day == quota.quota_day
            && user.daily_ads_watched + 1 != quota.daily_ads_watched;
        if moved {
            return Err(Error::Conflict("quota changed concurrently".into()));
        }
        quota.apply(user);

        Ok(Appended::Created(state.push(tx)?))
    }

    async fn find_transaction(
        &self,
        related_entity_id: &str,
        kind: TransactionType,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read().await;
        Ok(state
            .keys
            .get(&(related_entity_id.to_owned(), kind))
            .and_then(|index| state.transactions.get(*index))
            .cloned())
    }

    async fn list_transactions(&self, user_id: Option<&str>) -> Result<Vec<Transaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .filter(|tx| user_id.is_none_or(|id| tx.user_id == id))
            .cloned()
            .collect())
    }

    async fn sum_transactions(&self, user_id: &str) -> Result<Decimal> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .map(|tx| tx.amount)
            .sum())
    }

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal, tx: Transaction) -> Result<()> {
        let mut state = self.state.write().await;
        if state.existing(&tx).is_some() {
            return Err(Error::Conflict("withdrawal already recorded".into()));
        }
        state.push(tx)?;
        state.withdrawals.push(withdrawal.clone());
        Ok(())
    }

    async fn find_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>> {
        Ok(self
            .state
            .read()
            .await
            .withdrawals
            .iter()
            .find(|w| w.id == id)
            .cloned())
    }

    async fn list_withdrawals(
        &self,
        user_id: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>> {
        Ok(self
            .state
            .read()
            .await
            .withdrawals
            .iter()
            .rev()
            .filter(|w| user_id.is_none_or(|id| w.user_id == id))
            .filter(|w| status.is_none_or(|status| w.status == status))
            .cloned()
            .collect())
    }

    async fn settle_withdrawal(&self, settlement: &Settlement, tx: Transaction) -> Result<Withdrawal> {
        let mut state = self.state.write().await;
        let index = state
            .withdrawals
            .iter()
            .position(|w| w.id == settlement.withdrawal_id)
            .ok_or(Error::not_found("withdrawal"))?;

        let current = state.withdrawals[index].status;
        if current != WithdrawalStatus::Pending {
            return Err(ValidationError::AlreadyProcessed {
                entity: "withdrawal",
                status: current.to_string(),
            }
            .into());
        }
        if state.existing(&tx).is_none() {
            state.push(tx)?;
        }

        let withdrawal = &mut state.withdrawals[index];
        withdrawal.status = settlement.status;
        withdrawal.processed_at = Some(settlement.processed_at);
        withdrawal.admin_notes = settlement.admin_notes.clone();
        Ok(withdrawal.clone())
    }

    async fn insert_completion(&self, completion: &TaskCompletion) -> Result<()> {
        let mut state = self.state.write().await;
        let pending = state.completions.iter().any(|c| {
            c.user_id == completion.user_id
                && c.task_id == completion.task_id
                && c.status == CompletionStatus::PendingReview
        });
        if pending {
            return Err(ValidationError::SubmissionPending.into());
        }
        state.completions.push(completion.clone());
        Ok(())
    }

    async fn find_completion(&self, id: &str) -> Result<Option<TaskCompletion>> {
        Ok(self
            .state
            .read()
            .await
            .completions
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_completions(
        &self,
        user_id: Option<&str>,
        status: Option<CompletionStatus>,
    ) -> Result<Vec<TaskCompletion>> {
        Ok(self
            .state
            .read()
            .await
            .completions
            .iter()
            .rev()
            .filter(|c| user_id.is_none_or(|id| c.user_id == id))
            .filter(|c| status.is_none_or(|status| c.status == status))
            .cloned()
            .collect())
    }

    async fn review_completion(
        &self,
        review: &Review,
        tx: Option<Transaction>,
    ) -> Result<TaskCompletion> {
        let mut state = self.state.write().await;
        let index = state
            .completions
            .iter()
            .position(|c| c.id == review.completion_id)
            .ok_or(Error::not_found("task completion"))?;

        let current = state.completions[index].status;
        if current != CompletionStatus::PendingReview {
            return Err(ValidationError::AlreadyProcessed {
                entity: "task completion",
                status: current.to_string(),
            }
            .into());
        }
        if let Some(tx) = tx {
            if state.existing(&tx).is_none() {
                state.push(tx)?;
            }
        }

        let completion = &mut state.completions[index];
        completion.status = review.status;
        completion.reviewed_at = Some(review.reviewed_at);
        completion.review_notes = review.notes.clone();
        Ok(completion.clone())
    }
}

#[async_trait]
impl SettingsRepository for MemoryStore {
    async fn load_settings(&self) -> Result<Option<PlatformSettings>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: &PlatformSettings) -> Result<()> {
        self.state.write().await.settings = Some(settings.clone());
        Ok(())
    }
}
