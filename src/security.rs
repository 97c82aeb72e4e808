//! Maps fraud signals and the ban flag to a gating decision.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::User;

const MULTIPLE_ACCOUNTS: &str = "Multiple accounts detected from this device.";
const VPN: &str = "VPN usage detected.";
const PROXY: &str = "Proxy usage detected.";
const EMULATOR: &str = "Emulator usage detected.";
const BANNED: &str = "Your account is currently banned.";
const ALL_GOOD: &str = "Your account security is good.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    Safe,
    Warning,
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatus {
    pub status: SecurityLevel,
    pub reasons: Vec<String>,
}

impl SecurityStatus {
    pub fn is_blocked(&self) -> bool {
        self.status == SecurityLevel::Blocked
    }
}

/// Inputs of [`evaluate`]. Absent device info means no signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SecuritySignals {
    pub is_banned: bool,
    pub vpn_detected: bool,
    pub proxy_detected: bool,
    pub emulator_detected: bool,
    pub multiple_accounts_detected: bool,
}

impl From<&User> for SecuritySignals {
    fn from(user: &User) -> Self {
        let device = user.device_info.as_ref();
        Self {
            is_banned: user.is_banned,
            vpn_detected: device.is_some_and(|d| d.vpn_detected),
            proxy_detected: device.is_some_and(|d| d.proxy_detected),
            emulator_detected: device.is_some_and(|d| d.emulator_detected),
            multiple_accounts_detected: device.is_some_and(|d| d.multiple_accounts_detected),
        }
    }
}

/// The ban flag blocks. Any device signal only warns.
pub fn evaluate(signals: &SecuritySignals) -> SecurityStatus {
    let mut reasons = Vec::new();
    if signals.multiple_accounts_detected {
        reasons.push(MULTIPLE_ACCOUNTS.to_owned());
    }
    if signals.vpn_detected {
        reasons.push(VPN.to_owned());
    }
    if signals.proxy_detected {
        reasons.push(PROXY.to_owned());
    }
    if signals.emulator_detected {
        reasons.push(EMULATOR.to_owned());
    }

    let status = if signals.is_banned {
        SecurityLevel::Blocked
    } else if reasons.is_empty() {
        SecurityLevel::Safe
    } else {
        SecurityLevel::Warning
    };

    if signals.is_banned {
        reasons.push(BANNED.to_owned());
    }
    if status == SecurityLevel::Safe {
        reasons.push(ALL_GOOD.to_owned());
    }

    SecurityStatus { status, reasons }
}

/// Refuses every credit and payout for a blocked user.
pub fn ensure_allowed(user: &User) -> Result<()> {
    if evaluate(&SecuritySignals::from(user)).is_blocked() {
        Err(Error::Blocked)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_signals_are_safe() {
        let status = evaluate(&SecuritySignals::default());
        assert_eq!(status.status, SecurityLevel::Safe);
        assert_eq!(status.reasons, vec![ALL_GOOD.to_owned()]);
    }

    #[test]
    fn test_vpn_only_warns() {
        let status = evaluate(&SecuritySignals {
            vpn_detected: true,
            emulator_detected: true,
            ..Default::default()
        });
        assert_eq!(status.status, SecurityLevel::Warning);
        assert_eq!(status.reasons, vec![VPN.to_owned(), EMULATOR.to_owned()]);
    }

    #[test]
    fn test_multiple_accounts_warn() {
        let status = evaluate(&SecuritySignals {
            multiple_accounts_detected: true,
            proxy_detected: true,
            ..Default::default()
        });
        assert_eq!(status.status, SecurityLevel::Warning);
        assert_eq!(
            status.reasons,
            vec![MULTIPLE_ACCOUNTS.to_owned(), PROXY.to_owned()]
        );
    }

    #[test]
    fn test_ban_keeps_device_reasons() {
        let status = evaluate(&SecuritySignals {
            is_banned: true,
            vpn_detected: true,
            ..Default::default()
        });
        assert!(status.is_blocked());
        assert_eq!(status.reasons, vec![VPN.to_owned(), BANNED.to_owned()]);
    }

    #[test]
    fn test_ban_overrides_clean_device() {
        let status = evaluate(&SecuritySignals {
            is_banned: true,
            ..Default::default()
        });
        assert!(status.is_blocked());
        assert_eq!(status.reasons, vec![BANNED.to_owned()]);
    }
}
