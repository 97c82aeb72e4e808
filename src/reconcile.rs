//! Displayed balance ahead of server confirmation.
//!
//! A provisional delta is shown as soon as an action starts, replaced by
//! the server's balance when the action is confirmed and removed when it
//! fails.

use rust_decimal::Decimal;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProvisionalBalance {
    confirmed: Decimal,
    pending: Vec<(String, Decimal)>,
}

impl ProvisionalBalance {
    pub fn new(confirmed: Decimal) -> Self {
        Self {
            confirmed,
            pending: Vec::new(),
        }
    }

    /// Last balance the server reported.
    pub fn confirmed(&self) -> Decimal {
        self.confirmed
    }

    /// Confirmed balance plus every delta still in flight.
    pub fn displayed(&self) -> Decimal {
        self.confirmed + self.pending.iter().map(|(_, delta)| *delta).sum::<Decimal>()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.iter().any(|(k, _)| k == key)
    }

    /// Shows `delta` under `key`. A key already in flight is replaced.
    pub fn apply(&mut self, key: &str, delta: Decimal) -> Decimal {
        self.pending.retain(|(k, _)| k != key);
        self.pending.push((key.to_owned(), delta));
        self.displayed()
    }

    /// Drops the delta of `key` and takes `authoritative` as the balance.
    pub fn confirm(&mut self, key: &str, authoritative: Decimal) -> Decimal {
        self.pending.retain(|(k, _)| k != key);
        self.confirmed = authoritative;
        self.displayed()
    }

    /// Drops the delta of `key`, leaving the balance as it was before.
    pub fn rollback(&mut self, key: &str) -> Decimal {
        if self.is_pending(key) {
            tracing::debug!(%key, "provisional balance delta rolled back");
        }
        self.pending.retain(|(k, _)| k != key);
        self.displayed()
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_confirm_overwrites_with_server_value() {
        let mut balance = ProvisionalBalance::new(dec!(1.00));
        assert_eq!(balance.apply("view-1", dec!(0.01)), dec!(1.01));
        assert!(balance.is_pending("view-1"));

        // Server knows about an adjustment the client never saw.
        assert_eq!(balance.confirm("view-1", dec!(3.01)), dec!(3.01));
        assert!(!balance.is_pending("view-1"));
        assert_eq!(balance.confirmed(), dec!(3.01));
    }

    #[test]
    fn test_rollback_restores_previous_balance() {
        let mut balance = ProvisionalBalance::new(dec!(0.5));
        balance.apply("view-1", dec!(0.02));
        balance.apply("view-2", dec!(0.02));

        assert_eq!(balance.rollback("view-1"), dec!(0.52));
        assert_eq!(balance.rollback("view-1"), dec!(0.52));
        assert_eq!(balance.rollback("view-2"), dec!(0.5));
    }

    #[test]
    fn test_reapply_replaces_delta() {
        let mut balance = ProvisionalBalance::default();
        balance.apply("view-1", dec!(0.01));
        assert_eq!(balance.apply("view-1", dec!(0.01)), dec!(0.01));
    }
}
