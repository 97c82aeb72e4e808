//! Request and response bodies of the HTTP API, shared by the router and
//! the client.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::model::{AdOption, CompletionStatus, TaskCompletion, User, WithdrawalMethod, WithdrawalStatus};
use crate::security::SecurityStatus;

/// A user together with its derived security verdict.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(flatten)]
    pub user: User,
    pub security_status: SecurityStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserView,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
pub struct AdminLogin {
    #[validate(length(min = 1, message = "Username is required."))]
    pub username: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub username: String,
    pub token: String,
    pub is_admin: bool,
}

/// Query naming the user a list belongs to. Defaults to the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdQuery {
    #[serde(rename = "type")]
    pub kind: Option<AdOption>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalQuery {
    pub status: Option<WithdrawalStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionQuery {
    pub status: Option<CompletionStatus>,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdOptionBody {
    pub ad_option: AdOption,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewBody {
    #[validate(length(min = 1, message = "Ad identifier is required."))]
    pub ad_id: String,
    pub user_id: Option<String>,
    /// Idempotency key of this ad instance.
    #[validate(length(max = 128, message = "View identifier is too long."))]
    pub view_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleteBody {
    #[validate(length(min = 1, message = "Task identifier is required."))]
    pub task_id: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub submission_details: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompleteResponse {
    pub success: bool,
    pub new_balance: Decimal,
    pub task_completion: TaskCompletion,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalBody {
    pub user_id: Option<String>,
    pub amount: Decimal,
    pub method: WithdrawalMethod,
    #[serde(default)]
    pub details: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub success: bool,
    pub withdrawal_id: String,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
pub struct ReasonBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
pub struct AdjustBody {
    pub amount: Decimal,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl Default for SuccessResponse {
    fn default() -> Self {
        Self { success: true }
    }
}
