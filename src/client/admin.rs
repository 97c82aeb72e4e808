use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;

use super::{ApiClient, Scope};
use crate::catalog::{AdPatch, NewAd, NewTask, TaskPatch};
use crate::dto::{AdjustBody, ReasonBody, SuccessResponse, UserView};
use crate::error::{Result, ValidationError};
use crate::model::{Ad, CompletionStatus, Task, TaskCompletion, Transaction, Withdrawal, WithdrawalStatus};
use crate::settings::{PlatformSettings, SettingsPatch};

/// Administrator calls. All of them fail with `Unauthorized` when the
/// client holds no administrator token.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn users(&self) -> Result<Vec<UserView>>;
    async fn ban(&self, user_id: &str) -> Result<UserView>;
    async fn unban(&self, user_id: &str) -> Result<UserView>;
    async fn adjust_balance(&self, user_id: &str, amount: Decimal, reason: &str) -> Result<Transaction>;

    async fn ads(&self) -> Result<Vec<Ad>>;
    async fn create_ad(&self, ad: &NewAd) -> Result<Ad>;
    async fn update_ad(&self, ad_id: &str, patch: &AdPatch) -> Result<Ad>;
    async fn delete_ad(&self, ad_id: &str) -> Result<()>;

    async fn tasks(&self) -> Result<Vec<Task>>;
    async fn create_task(&self, task: &NewTask) -> Result<Task>;
    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task>;
    async fn delete_task(&self, task_id: &str) -> Result<()>;

    async fn withdrawals(&self, status: Option<WithdrawalStatus>) -> Result<Vec<Withdrawal>>;
    async fn approve_withdrawal(&self, withdrawal_id: &str) -> Result<Withdrawal>;
    async fn reject_withdrawal(&self, withdrawal_id: &str, reason: &str) -> Result<Withdrawal>;

    async fn completions(&self, status: Option<CompletionStatus>) -> Result<Vec<TaskCompletion>>;
    async fn approve_completion(&self, completion_id: &str) -> Result<TaskCompletion>;
    async fn reject_completion(&self, completion_id: &str, reason: &str) -> Result<TaskCompletion>;

    async fn transactions(&self) -> Result<Vec<Transaction>>;
    async fn settings(&self) -> Result<PlatformSettings>;
    async fn update_settings(&self, patch: &SettingsPatch) -> Result<PlatformSettings>;
}

fn reason_body(reason: &str) -> Result<ReasonBody> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ValidationError::EmptyReason.into());
    }
    Ok(ReasonBody {
        reason: reason.to_owned(),
    })
}

#[async_trait]
impl AdminApi for ApiClient {
    async fn users(&self) -> Result<Vec<UserView>> {
        self.get("/admin/users", Scope::Admin).await
    }

    async fn ban(&self, user_id: &str) -> Result<UserView> {
        self.call(Method::POST, &format!("/admin/users/{user_id}/ban"), &(), Scope::Admin)
            .await
    }

    async fn unban(&self, user_id: &str) -> Result<UserView> {
        self.call(Method::POST, &format!("/admin/users/{user_id}/unban"), &(), Scope::Admin)
            .await
    }

    async fn adjust_balance(&self, user_id: &str, amount: Decimal, reason: &str) -> Result<Transaction> {
        let body = AdjustBody {
            amount,
            reason: reason_body(reason)?.reason,
        };
        self.call(Method::POST, &format!("/admin/users/{user_id}/adjust"), &body, Scope::Admin)
            .await
    }

    async fn ads(&self) -> Result<Vec<Ad>> {
        self.get("/admin/ads", Scope::Admin).await
    }

    async fn create_ad(&self, ad: &NewAd) -> Result<Ad> {
        self.call(Method::POST, "/admin/ads", ad, Scope::Admin).await
    }

    async fn update_ad(&self, ad_id: &str, patch: &AdPatch) -> Result<Ad> {
        self.call(Method::PUT, &format!("/admin/ads/{ad_id}"), patch, Scope::Admin)
            .await
    }

    async fn delete_ad(&self, ad_id: &str) -> Result<()> {
        let _: SuccessResponse = self
            .call(Method::DELETE, &format!("/admin/ads/{ad_id}"), &(), Scope::Admin)
            .await?;
        Ok(())
    }

    async fn tasks(&self) -> Result<Vec<Task>> {
        self.get("/admin/tasks", Scope::Admin).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        self.call(Method::POST, "/admin/tasks", task, Scope::Admin).await
    }

    async fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Task> {
        self.call(Method::PUT, &format!("/admin/tasks/{task_id}"), patch, Scope::Admin)
            .await
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        let _: SuccessResponse = self
            .call(Method::DELETE, &format!("/admin/tasks/{task_id}"), &(), Scope::Admin)
            .await?;
        Ok(())
    }

    async fn withdrawals(&self, status: Option<WithdrawalStatus>) -> Result<Vec<Withdrawal>> {
        match status {
            Some(status) => {
                self.get_with("/admin/withdrawals", &[("status", status.as_str())], Scope::Admin)
                    .await
            },
            None => self.get("/admin/withdrawals", Scope::Admin).await,
        }
    }

    async fn approve_withdrawal(&self, withdrawal_id: &str) -> Result<Withdrawal> {
        let path = format!("/admin/withdrawals/{withdrawal_id}/approve");
        self.call(Method::POST, &path, &(), Scope::Admin).await
    }

    async fn reject_withdrawal(&self, withdrawal_id: &str, reason: &str) -> Result<Withdrawal> {
        let body = reason_body(reason)?;
        let path = format!("/admin/withdrawals/{withdrawal_id}/reject");
        self.call(Method::POST, &path, &body, Scope::Admin).await
    }

    async fn completions(&self, status: Option<CompletionStatus>) -> Result<Vec<TaskCompletion>> {
        match status {
            Some(status) => {
                self.get_with("/admin/task-completions", &[("status", status.as_str())], Scope::Admin)
                    .await
            },
            None => self.get("/admin/task-completions", Scope::Admin).await,
        }
    }

    async fn approve_completion(&self, completion_id: &str) -> Result<TaskCompletion> {
        let path = format!("/admin/task-completions/{completion_id}/approve");
        self.call(Method::POST, &path, &(), Scope::Admin).await
    }

    async fn reject_completion(&self, completion_id: &str, reason: &str) -> Result<TaskCompletion> {
        let body = reason_body(reason)?;
        let path = format!("/admin/task-completions/{completion_id}/reject");
        self.call(Method::POST, &path, &body, Scope::Admin).await
    }

    async fn transactions(&self) -> Result<Vec<Transaction>> {
        self.get("/admin/transactions", Scope::Admin).await
    }

    async fn settings(&self) -> Result<PlatformSettings> {
        self.get("/admin/settings", Scope::Admin).await
    }

    async fn update_settings(&self, patch: &SettingsPatch) -> Result<PlatformSettings> {
        self.call(Method::PUT, "/admin/settings", patch, Scope::Admin).await
    }
}
