//! Server-side crediting of an ad view.
//!
//! One view is one unit of work: quota consumption and the `ad_earning`
//! entry are stored together, keyed by the view identifier so a retried
//! request is answered with the first result.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{Error, Result, ValidationError};
use crate::inflight::KeyedLock;
use crate::ledger::{self, BalanceLedger, NewTransaction};
use crate::model::{Transaction, TransactionType, User, new_id};
use crate::quota::QuotaManager;
use crate::settings::PlatformSettingsStore;
use crate::store::{QuotaState, Store};
use crate::user::UserService;

/// Answer to a credited view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditReceipt {
    pub success: bool,
    pub new_balance: Decimal,
    pub daily_ads_watched: u32,
    pub daily_ads_limit: u32,
    pub view_id: String,
    pub transaction_id: String,
    /// The view was already credited by an earlier request.
    #[serde(default)]
    pub duplicate: bool,
}

impl CreditReceipt {
    fn new(user: &User, tx: &Transaction, duplicate: bool) -> Self {
        Self {
            success: true,
            new_balance: user.balance,
            daily_ads_watched: user.daily_ads_watched,
            daily_ads_limit: user.daily_ads_limit,
            view_id: tx.related_entity_id.clone().unwrap_or_default(),
            transaction_id: tx.id.clone(),
            duplicate,
        }
    }
}

#[derive(Clone)]
pub struct RewardService {
    store: Arc<dyn Store>,
    users: UserService,
    catalog: Catalog,
    ledger: BalanceLedger,
    quota: QuotaManager,
    settings: PlatformSettingsStore,
    locks: KeyedLock,
}

impl RewardService {
    pub fn new(
        store: Arc<dyn Store>,
        users: UserService,
        catalog: Catalog,
        ledger: BalanceLedger,
        quota: QuotaManager,
        settings: PlatformSettingsStore,
        locks: KeyedLock,
    ) -> Self {
        Self {
            store,
            users,
            catalog,
            ledger,
            quota,
            settings,
            locks,
        }
    }

    /// Credits `ad_id` to `user_id`. A missing `view_id` gets a fresh one,
    /// which makes the request non-idempotent.
    pub async fn credit(&self, user_id: &str, ad_id: &str, view_id: Option<String>) -> Result<CreditReceipt> {
        let view_id = view_id.filter(|id| !id.trim().is_empty()).unwrap_or_else(new_id);
        let _guard = self.locks.lock(user_id).await;

        if let Some(receipt) = self.replay(user_id, &view_id).await? {
            return Ok(receipt);
        }

        let user = self.users.find(user_id).await?;
        let ad = self.catalog.ad(ad_id).await?;
        if !ad.is_active || ad.kind != user.ad_option {
            return Err(ValidationError::AdUnavailable.into());
        }

        let settings = self.settings.get().await?;
        let mut consumed = self.quota.record_consumption(&user, &settings)?;

        let tx = self.ledger.prepare(
            NewTransaction::new(user_id, TransactionType::AdEarning, ad.earning_per_view)
                .related_to(view_id.clone())
                .describe(format!("Ad view: {}", ad.title)),
        )?;
        let appended = self
            .store
            .credit_ad_view(tx, &QuotaState::from(&consumed))
            .await?;
        ledger::record(&appended);

        if appended.is_duplicate() {
            return self
                .replay(user_id, &view_id)
                .await?
                .ok_or(Error::internal("credited view vanished"));
        }

        consumed.balance += appended.transaction().amount;
        metrics::counter!("ad_views_credited_total").increment(1);
        tracing::info!(
            %user_id,
            %ad_id,
            %view_id,
            watched = consumed.daily_ads_watched,
            limit = consumed.daily_ads_limit,
            "ad view credited"
        );

        Ok(CreditReceipt::new(&consumed, appended.transaction(), false))
    }

    /// Prior result for `view_id`, if it was already credited.
    async fn replay(&self, user_id: &str, view_id: &str) -> Result<Option<CreditReceipt>> {
        let Some(tx) = self
            .store
            .find_transaction(view_id, TransactionType::AdEarning)
            .await?
        else {
            return Ok(None);
        };

        if tx.user_id != user_id {
            return Err(ValidationError::ViewKeyReused.into());
        }

        tracing::info!(%user_id, %view_id, "ad view already credited, replaying");
        let user = self.users.find(user_id).await?;
        Ok(Some(CreditReceipt::new(&user, &tx, true)))
    }

    /// `ad_earning` entries of a user, newest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let mut views: Vec<Transaction> = self
            .ledger
            .history(user_id)
            .await?
            .into_iter()
            .filter(|tx| tx.kind == TransactionType::AdEarning)
            .collect();
        views.reverse();
        Ok(views)
    }
}
