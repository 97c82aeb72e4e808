//! Records shared by the server, the stores and the client.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A stored text does not name any known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(pub String);

/// Gives an enum the same text form in SQL columns and query strings as
/// on the JSON wire.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_owned())),
                }
            }
        }
    };
}

/// Earning tier a user picked. Also the `type` of an [`Ad`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdOption {
    #[default]
    Option1,
    Option2,
}

text_enum!(AdOption {
    Option1 => "option1",
    Option2 => "option2",
});

/// Fraud signals reported by the client device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub ip_address: String,
    pub browser: String,
    pub os: String,
    pub device_fingerprint: String,
    pub vpn_detected: bool,
    pub proxy_detected: bool,
    pub emulator_detected: bool,
    pub multiple_accounts_detected: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blocked_attempts: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub telegram_id: String,
    pub username: String,
    /// Cached projection of the ledger.
    pub balance: Decimal,
    pub daily_ads_watched: u32,
    pub daily_ads_limit: u32,
    pub ad_option: AdOption,
    /// UTC day the two counters above belong to.
    pub quota_day: NaiveDate,
    pub is_banned: bool,
    #[serde(default)]
    pub is_admin: bool,
    pub device_info: Option<DeviceInfo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ad {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: Option<String>,
    pub ad_link: Option<String>,
    pub earning_per_view: Decimal,
    #[serde(rename = "type")]
    pub kind: AdOption,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Completed,
}

text_enum!(TaskStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Completed => "completed",
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub earning: Decimal,
    pub status: TaskStatus,
    pub link: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Whether users may submit proof for this task.
    pub fn is_open(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Approved)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    PendingReview,
    Approved,
    Rejected,
}

text_enum!(CompletionStatus {
    PendingReview => "pending_review",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub id: String,
    pub user_id: String,
    pub task_id: String,
    pub completed_at: DateTime<Utc>,
    /// Task earning captured at submission time.
    pub earning: Decimal,
    pub status: CompletionStatus,
    pub submission_details: String,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalMethod {
    Bkash,
    Nagad,
    Binance,
    #[serde(rename = "Crypto Currency Network")]
    CryptoNetwork,
}

text_enum!(WithdrawalMethod {
    Bkash => "Bkash",
    Nagad => "Nagad",
    Binance => "Binance",
    CryptoNetwork => "Crypto Currency Network",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(WithdrawalStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    pub details: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub admin_notes: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    AdEarning,
    TaskEarning,
    WithdrawalRequest,
    WithdrawalApproved,
    WithdrawalRejected,
    AdminAdjustment,
}

text_enum!(TransactionType {
    AdEarning => "ad_earning",
    TaskEarning => "task_earning",
    WithdrawalRequest => "withdrawal_request",
    WithdrawalApproved => "withdrawal_approved",
    WithdrawalRejected => "withdrawal_rejected",
    AdminAdjustment => "admin_adjustment",
});

/// Immutable ledger entry. Balances are sums of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub related_entity_id: Option<String>,
}

/// Fresh random identifier for a new record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
