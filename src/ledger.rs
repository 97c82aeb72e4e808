//! Append-only balance ledger.
//!
//! A balance is the sum of a user's transactions. `User.balance` is a cached
//! projection updated by the store in the same unit of work as each append.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::{Error, Result, ValidationError};
use crate::model::{Transaction, TransactionType, new_id};
use crate::store::{Appended, Store};

/// Entry about to be appended.
#[derive(Clone, Debug, PartialEq)]
pub struct NewTransaction {
    pub user_id: String,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub related_entity_id: Option<String>,
}

impl NewTransaction {
    pub fn new(user_id: impl Into<String>, kind: TransactionType, amount: Decimal) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            amount,
            description: String::default(),
            related_entity_id: None,
        }
    }

    pub fn related_to(mut self, id: impl Into<String>) -> Self {
        self.related_entity_id = Some(id.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sign rules per type. Every type except admin adjustments is keyed
    /// by the entity it settles.
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        let sign_ok = match self.kind {
            TransactionType::AdEarning | TransactionType::TaskEarning => {
                self.amount > Decimal::ZERO
            },
            TransactionType::WithdrawalRequest | TransactionType::WithdrawalRejected => {
                self.amount.is_zero()
            },
            TransactionType::WithdrawalApproved => self.amount < Decimal::ZERO,
            TransactionType::AdminAdjustment => !self.amount.is_zero(),
        };
        if !sign_ok {
            return Err(ValidationError::MalformedTransaction(
                "amount sign does not match transaction type",
            ));
        }

        if self.kind != TransactionType::AdminAdjustment && self.related_entity_id.is_none() {
            return Err(ValidationError::MalformedTransaction(
                "transaction must reference the entity it settles",
            ));
        }
        Ok(())
    }
}

/// Cached projection compared with the ledger sum.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Audit {
    pub user_id: String,
    pub cached: Decimal,
    pub derived: Decimal,
    pub repaired: bool,
}

#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validates `new` and stamps it with an id and the current time.
    pub fn prepare(&self, new: NewTransaction) -> Result<Transaction> {
        new.validate()?;

        Ok(Transaction {
            id: new_id(),
            user_id: new.user_id,
            kind: new.kind,
            amount: new.amount,
            description: new.description,
            timestamp: self.clock.now(),
            related_entity_id: new.related_entity_id,
        })
    }

    pub async fn append(&self, new: NewTransaction) -> Result<Appended> {
        let tx = self.prepare(new)?;
        let appended = self.store.append_transaction(tx).await?;
        record(&appended);
        Ok(appended)
    }

    pub async fn balance_of(&self, user_id: &str) -> Result<Decimal> {
        self.store.sum_transactions(user_id).await
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<Transaction>> {
        self.store.list_transactions(Some(user_id)).await
    }

    pub async fn all(&self) -> Result<Vec<Transaction>> {
        self.store.list_transactions(None).await
    }

    /// Direct administrator write to a balance.
    pub async fn adjust(&self, user_id: &str, amount: Decimal, reason: &str) -> Result<Transaction> {
        if self.store.find_user(user_id).await?.is_none() {
            return Err(Error::not_found("user"));
        }
        if reason.trim().is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let new = NewTransaction::new(user_id, TransactionType::AdminAdjustment, amount)
            .describe(reason.trim());
        let appended = self.append(new).await?;

        tracing::info!(%user_id, %amount, "balance adjusted by administrator");
        Ok(appended.into_transaction())
    }

    /// Recomputes the balance from the ledger and repairs the cached value.
    pub async fn audit(&self, user_id: &str) -> Result<Audit> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(Error::not_found("user"))?;
        let derived = self.balance_of(user_id).await?;

        let repaired = user.balance != derived;
        if repaired {
            tracing::warn!(%user_id, cached = %user.balance, %derived, "balance projection drifted, repairing");
            self.store.set_cached_balance(user_id, derived).await?;
        }

        Ok(Audit {
            user_id: user.id,
            cached: user.balance,
            derived,
            repaired,
        })
    }
}

/// Logs and counts an append outcome.
pub(crate) fn record(appended: &Appended) {
    let tx = appended.transaction();
    match appended {
        Appended::Created(_) => {
            tracing::info!(
                user_id = %tx.user_id,
                r#type = %tx.kind,
                amount = %tx.amount,
                related = tx.related_entity_id.as_deref(),
                "ledger entry appended"
            );
            metrics::counter!("ledger_transactions_total", "type" => tx.kind.as_str()).increment(1);
        },
        Appended::Duplicate(_) => {
            tracing::info!(
                user_id = %tx.user_id,
                r#type = %tx.kind,
                related = tx.related_entity_id.as_deref(),
                "duplicate ledger entry suppressed"
            );
        },
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::clock::SystemClock;
    use crate::store::tests::sample_user;
    use crate::store::{MemoryStore, UserRepository};

    async fn ledger() -> (Arc<MemoryStore>, BalanceLedger) {
        let store = Arc::new(MemoryStore::default());
        store.insert_user(&sample_user("u1")).await.unwrap();
        (store.clone(), BalanceLedger::new(store, Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn test_balance_is_sum_of_entries() {
        let (store, ledger) = ledger().await;

        ledger
            .append(NewTransaction::new("u1", TransactionType::AdEarning, dec!(0.01)).related_to("v1"))
            .await
            .unwrap();
        ledger
            .append(NewTransaction::new("u1", TransactionType::TaskEarning, dec!(2.50)).related_to("c1"))
            .await
            .unwrap();
        ledger
            .append(NewTransaction::new("u1", TransactionType::WithdrawalRequest, dec!(0)).related_to("w1"))
            .await
            .unwrap();

        assert_eq!(ledger.balance_of("u1").await.unwrap(), dec!(2.51));
        assert_eq!(store.find_user("u1").await.unwrap().unwrap().balance, dec!(2.51));
        assert_eq!(ledger.history("u1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_same_key_appends_once() {
        let (_, ledger) = ledger().await;
        let new = NewTransaction::new("u1", TransactionType::AdEarning, dec!(0.02)).related_to("v1");

        let first = ledger.append(new.clone()).await.unwrap();
        let second = ledger.append(new).await.unwrap();

        assert!(!first.is_duplicate());
        assert!(second.is_duplicate());
        assert_eq!(first.transaction().id, second.transaction().id);
        assert_eq!(ledger.balance_of("u1").await.unwrap(), dec!(0.02));
    }

    #[tokio::test]
    async fn test_rejects_wrong_sign() {
        let (_, ledger) = ledger().await;

        let err = ledger
            .append(NewTransaction::new("u1", TransactionType::WithdrawalApproved, dec!(5)).related_to("w1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MalformedTransaction(_))
        ));

        let err = ledger
            .append(NewTransaction::new("u1", TransactionType::AdEarning, dec!(0.01)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MalformedTransaction(_))
        ));
        assert!(ledger.history("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adjustment_requires_reason() {
        let (_, ledger) = ledger().await;

        assert!(matches!(
            ledger.adjust("u1", dec!(1), " ").await,
            Err(Error::Validation(ValidationError::EmptyReason))
        ));
        assert!(matches!(
            ledger.adjust("ghost", dec!(1), "bonus").await,
            Err(Error::NotFound { .. })
        ));

        let tx = ledger.adjust("u1", dec!(-0.5), "chargeback").await.unwrap();
        assert_eq!(tx.kind, TransactionType::AdminAdjustment);
        assert_eq!(ledger.balance_of("u1").await.unwrap(), dec!(-0.5));
    }

    #[tokio::test]
    async fn test_audit_repairs_drift() {
        let (store, ledger) = ledger().await;
        ledger
            .append(NewTransaction::new("u1", TransactionType::AdEarning, dec!(0.01)).related_to("v1"))
            .await
            .unwrap();
        store.set_cached_balance("u1", dec!(99)).await.unwrap();

        let audit = ledger.audit("u1").await.unwrap();
        assert!(audit.repaired);
        assert_eq!(audit.cached, dec!(99));
        assert_eq!(audit.derived, dec!(0.01));

        let audit = ledger.audit("u1").await.unwrap();
        assert!(!audit.repaired);
    }
}
