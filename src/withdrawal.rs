//! Cash-out requests and their settlement.
//!
//! Requesting does not reserve funds: the `withdrawal_request` entry is
//! informational and the debit happens once, on approval. Approval checks
//! again that the ledger still covers the amount.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::clock::Clock;
use crate::error::{Error, Result, ValidationError};
use crate::inflight::{InFlight, KeyedLock};
use crate::ledger::{self, BalanceLedger, NewTransaction};
use crate::model::{Transaction, TransactionType, Withdrawal, WithdrawalMethod, WithdrawalStatus, new_id};
use crate::security;
use crate::settings::PlatformSettingsStore;
use crate::store::{Appended, Settlement, Store};
use crate::user::UserService;

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    #[validate(length(max = 500, message = "Payment details are too long."))]
    pub details: String,
}

/// Creation preconditions, checked in this order.
pub fn validate_request(
    amount: Decimal,
    details: &str,
    balance: Decimal,
    min_withdrawal: Decimal,
) -> std::result::Result<(), ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    if amount < min_withdrawal {
        return Err(ValidationError::BelowMinimum {
            minimum: min_withdrawal,
        });
    }
    if amount > balance {
        return Err(ValidationError::InsufficientBalance {
            requested: amount,
            available: balance,
        });
    }
    if details.trim().is_empty() {
        return Err(ValidationError::EmptyDetails);
    }
    Ok(())
}

#[derive(Clone)]
pub struct WithdrawalWorkflow {
    store: Arc<dyn Store>,
    users: UserService,
    ledger: BalanceLedger,
    settings: PlatformSettingsStore,
    locks: KeyedLock,
    inflight: InFlight,
    clock: Arc<dyn Clock>,
}

impl WithdrawalWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        users: UserService,
        ledger: BalanceLedger,
        settings: PlatformSettingsStore,
        locks: KeyedLock,
        inflight: InFlight,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            users,
            ledger,
            settings,
            locks,
            inflight,
            clock,
        }
    }

    pub async fn request(&self, user_id: &str, request: WithdrawalRequest) -> Result<Withdrawal> {
        request.validate()?;
        let _guard = self.locks.lock(user_id).await;

        let user = self.users.find(user_id).await?;
        security::ensure_allowed(&user)?;

        let balance = self.ledger.balance_of(user_id).await?;
        let settings = self.settings.get().await?;
        validate_request(request.amount, &request.details, balance, settings.min_withdrawal)?;

        let withdrawal = Withdrawal {
            id: new_id(),
            user_id: user_id.to_owned(),
            amount: request.amount,
            method: request.method,
            details: request.details.trim().to_owned(),
            status: WithdrawalStatus::Pending,
            requested_at: self.clock.now(),
            processed_at: None,
            admin_notes: None,
        };
        let tx = self.ledger.prepare(
            NewTransaction::new(user_id, TransactionType::WithdrawalRequest, Decimal::ZERO)
                .related_to(withdrawal.id.clone())
                .describe(format!("Withdrawal of {} via {} requested", withdrawal.amount, withdrawal.method)),
        )?;
        self.store.insert_withdrawal(&withdrawal, tx.clone()).await?;
        ledger::record(&Appended::Created(tx));

        metrics::counter!("withdrawals_total", "status" => WithdrawalStatus::Pending.as_str()).increment(1);
        tracing::info!(%user_id, withdrawal_id = %withdrawal.id, amount = %withdrawal.amount, "withdrawal requested");
        Ok(withdrawal)
    }

    /// Debits the amount. Approving an approved withdrawal returns it
    /// unchanged.
    pub async fn approve(&self, id: &str, notes: Option<String>) -> Result<Withdrawal> {
        let _busy = self.inflight.try_begin(format!("withdrawal {id}"))?;
        let withdrawal = self.find(id).await?;

        match withdrawal.status {
            WithdrawalStatus::Approved => return Ok(withdrawal),
            WithdrawalStatus::Rejected => {
                return Err(ValidationError::AlreadyProcessed {
                    entity: "withdrawal",
                    status: withdrawal.status.to_string(),
                }
                .into());
            },
            WithdrawalStatus::Pending => {},
        }

        let _guard = self.locks.lock(&withdrawal.user_id).await;
        let balance = self.ledger.balance_of(&withdrawal.user_id).await?;
        if balance < withdrawal.amount {
            return Err(ValidationError::InsufficientBalance {
                requested: withdrawal.amount,
                available: balance,
            }
            .into());
        }

        let tx = self.ledger.prepare(
            NewTransaction::new(&withdrawal.user_id, TransactionType::WithdrawalApproved, -withdrawal.amount)
                .related_to(id)
                .describe(format!("Withdrawal via {} paid", withdrawal.method)),
        )?;
        self.settle(id, WithdrawalStatus::Approved, notes, tx).await
    }

    /// Closes the request without moving the balance.
    pub async fn reject(&self, id: &str, reason: &str) -> Result<Withdrawal> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let _busy = self.inflight.try_begin(format!("withdrawal {id}"))?;
        let withdrawal = self.find(id).await?;

        match withdrawal.status {
            WithdrawalStatus::Rejected => return Ok(withdrawal),
            WithdrawalStatus::Approved => {
                return Err(ValidationError::AlreadyProcessed {
                    entity: "withdrawal",
                    status: withdrawal.status.to_string(),
                }
                .into());
            },
            WithdrawalStatus::Pending => {},
        }

        let tx = self.ledger.prepare(
            NewTransaction::new(&withdrawal.user_id, TransactionType::WithdrawalRejected, Decimal::ZERO)
                .related_to(id)
                .describe(format!("Withdrawal rejected: {reason}")),
        )?;
        self.settle(id, WithdrawalStatus::Rejected, Some(reason.to_owned()), tx).await
    }

    async fn settle(
        &self,
        id: &str,
        status: WithdrawalStatus,
        notes: Option<String>,
        tx: Transaction,
    ) -> Result<Withdrawal> {
        let settlement = Settlement {
            withdrawal_id: id.to_owned(),
            status,
            processed_at: self.clock.now(),
            admin_notes: notes,
        };
        let withdrawal = self.store.settle_withdrawal(&settlement, tx.clone()).await?;
        ledger::record(&Appended::Created(tx));

        metrics::counter!("withdrawals_total", "status" => status.as_str()).increment(1);
        tracing::info!(withdrawal_id = %id, user_id = %withdrawal.user_id, %status, "withdrawal settled");
        Ok(withdrawal)
    }

    pub async fn find(&self, id: &str) -> Result<Withdrawal> {
        self.store
            .find_withdrawal(id)
            .await?
            .ok_or(Error::not_found("withdrawal"))
    }

    pub async fn list(&self, status: Option<WithdrawalStatus>) -> Result<Vec<Withdrawal>> {
        self.store.list_withdrawals(None, status).await
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        self.store.list_withdrawals(Some(user_id), None).await
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::clock::SystemClock;
    use crate::quota::QuotaManager;
    use crate::settings::PlatformSettings;
    use crate::store::MemoryStore;

    struct Fixture {
        users: UserService,
        ledger: BalanceLedger,
        workflow: WithdrawalWorkflow,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = PlatformSettingsStore::new(store.clone(), PlatformSettings::default());
        let locks = KeyedLock::default();
        let users = UserService::new(
            store.clone(),
            QuotaManager::new(clock.clone()),
            settings.clone(),
            clock.clone(),
            locks.clone(),
        );
        let ledger = BalanceLedger::new(store.clone(), clock.clone());
        let workflow = WithdrawalWorkflow::new(
            store,
            users.clone(),
            ledger.clone(),
            settings,
            locks,
            InFlight::default(),
            clock,
        );
        Fixture {
            users,
            ledger,
            workflow,
        }
    }

    async fn funded(fixture: &Fixture, amount: Decimal) -> String {
        let user = fixture.users.login("42", "alice").await.unwrap();
        fixture.ledger.adjust(&user.id, amount, "seed").await.unwrap();
        user.id
    }

    fn request(amount: Decimal) -> WithdrawalRequest {
        WithdrawalRequest {
            amount,
            method: WithdrawalMethod::Bkash,
            details: "01700000000".into(),
        }
    }

    #[test]
    fn test_preconditions_in_order() {
        let min = dec!(10);
        assert!(matches!(
            validate_request(dec!(-1), "", dec!(0), min),
            Err(ValidationError::NonPositiveAmount)
        ));
        assert!(matches!(
            validate_request(dec!(5), "", dec!(0), min),
            Err(ValidationError::BelowMinimum { .. })
        ));
        assert!(matches!(
            validate_request(dec!(11), "", dec!(10.5), min),
            Err(ValidationError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            validate_request(dec!(10), "  ", dec!(10.5), min),
            Err(ValidationError::EmptyDetails)
        ));
        assert!(validate_request(dec!(10), "acct", dec!(10), min).is_ok());
    }

    #[tokio::test]
    async fn test_request_does_not_move_balance() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;

        let withdrawal = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Pending);
        assert_eq!(fixture.ledger.balance_of(&user_id).await.unwrap(), dec!(12));

        let entries = fixture.ledger.history(&user_id).await.unwrap();
        assert_eq!(entries.last().unwrap().kind, TransactionType::WithdrawalRequest);
        assert_eq!(entries.last().unwrap().amount, dec!(0));
    }

    #[tokio::test]
    async fn test_insufficient_balance_creates_nothing() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;

        let err = fixture.workflow.request(&user_id, request(dec!(15))).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::InsufficientBalance { .. })
        ));
        assert!(fixture.workflow.list_for_user(&user_id).await.unwrap().is_empty());
        assert_eq!(fixture.ledger.history(&user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approval_debits_once() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;
        let withdrawal = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();

        let approved = fixture.workflow.approve(&withdrawal.id, None).await.unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        assert!(approved.processed_at.is_some());

        let again = fixture.workflow.approve(&withdrawal.id, None).await.unwrap();
        assert_eq!(again, approved);
        assert_eq!(fixture.ledger.balance_of(&user_id).await.unwrap(), dec!(2));

        let err = fixture.workflow.reject(&withdrawal.id, "late").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::AlreadyProcessed { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_keeps_balance() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;
        let withdrawal = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();

        assert!(matches!(
            fixture.workflow.reject(&withdrawal.id, " ").await,
            Err(Error::Validation(ValidationError::EmptyReason))
        ));

        let rejected = fixture.workflow.reject(&withdrawal.id, "invalid account").await.unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(rejected.admin_notes.as_deref(), Some("invalid account"));
        assert_eq!(fixture.ledger.balance_of(&user_id).await.unwrap(), dec!(12));

        assert!(matches!(
            fixture.workflow.approve(&withdrawal.id, None).await,
            Err(Error::Validation(ValidationError::AlreadyProcessed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_approval_rechecks_balance() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;
        let first = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();
        let second = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();

        fixture.workflow.approve(&first.id, None).await.unwrap();
        let err = fixture.workflow.approve(&second.id, None).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Validation(ValidationError::InsufficientBalance { .. })
        ));
        assert_eq!(
            fixture.workflow.find(&second.id).await.unwrap().status,
            WithdrawalStatus::Pending
        );
        assert_eq!(fixture.ledger.balance_of(&user_id).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_debit_once() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;
        let withdrawal = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap();

        let (a, b) = tokio::join!(
            fixture.workflow.approve(&withdrawal.id, None),
            fixture.workflow.approve(&withdrawal.id, None),
        );

        assert!(a.is_ok() || b.is_ok());
        for result in [a, b] {
            if let Err(err) = result {
                assert!(matches!(err, Error::Conflict(_)));
            }
        }
        assert_eq!(fixture.ledger.balance_of(&user_id).await.unwrap(), dec!(2));
    }

    #[tokio::test]
    async fn test_banned_user_cannot_request() {
        let fixture = fixture();
        let user_id = funded(&fixture, dec!(12)).await;
        fixture.users.set_banned(&user_id, true).await.unwrap();

        let err = fixture.workflow.request(&user_id, request(dec!(10))).await.unwrap_err();
        assert!(matches!(err, Error::Blocked));
    }
}
