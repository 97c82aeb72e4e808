//! Task submissions and their review.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::error::{Error, Result, ValidationError};
use crate::inflight::InFlight;
use crate::ledger::{self, BalanceLedger, NewTransaction};
use crate::model::{CompletionStatus, Task, TaskCompletion, TransactionType, new_id};
use crate::security;
use crate::store::{Appended, Review, Store};
use crate::user::UserService;

#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub task_id: String,
    #[validate(length(max = 2000, message = "Proof is too long."))]
    pub submission_details: String,
}

#[derive(Clone)]
pub struct TaskReviewWorkflow {
    store: Arc<dyn Store>,
    users: UserService,
    catalog: Catalog,
    ledger: BalanceLedger,
    inflight: InFlight,
    clock: Arc<dyn Clock>,
}

impl TaskReviewWorkflow {
    pub fn new(
        store: Arc<dyn Store>,
        users: UserService,
        catalog: Catalog,
        ledger: BalanceLedger,
        inflight: InFlight,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            users,
            catalog,
            ledger,
            inflight,
            clock,
        }
    }

    /// Open tasks the user has no pending or approved completion for.
    pub async fn available(&self, user_id: &str) -> Result<Vec<Task>> {
        let completions = self.store.list_completions(Some(user_id), None).await?;
        let mut tasks = self.catalog.open_tasks().await?;
        tasks.retain(|task| {
            !completions
                .iter()
                .any(|c| c.task_id == task.id && c.status != CompletionStatus::Rejected)
        });
        Ok(tasks)
    }

    pub async fn submit(&self, user_id: &str, submission: Submission) -> Result<TaskCompletion> {
        submission.validate()?;
        let proof = submission.submission_details.trim();
        if proof.is_empty() {
            return Err(ValidationError::EmptyProof.into());
        }

        let user = self.users.find(user_id).await?;
        security::ensure_allowed(&user)?;

        let task = self.catalog.task(&submission.task_id).await?;
        if !task.is_open() {
            return Err(ValidationError::TaskUnavailable.into());
        }
        let approved = self
            .store
            .list_completions(Some(user_id), Some(CompletionStatus::Approved))
            .await?
            .iter()
            .any(|c| c.task_id == task.id);
        if approved {
            return Err(ValidationError::TaskUnavailable.into());
        }

        let completion = TaskCompletion {
            id: new_id(),
            user_id: user_id.to_owned(),
            task_id: task.id,
            completed_at: self.clock.now(),
            earning: task.earning,
            status: CompletionStatus::PendingReview,
            submission_details: proof.to_owned(),
            reviewed_at: None,
            review_notes: None,
        };
        self.store.insert_completion(&completion).await?;

        metrics::counter!("task_completions_total", "status" => CompletionStatus::PendingReview.as_str())
            .increment(1);
        tracing::info!(%user_id, task_id = %completion.task_id, completion_id = %completion.id, "task submitted for review");
        Ok(completion)
    }

    /// Credits the earning captured at submission. Approving an approved
    /// completion returns it unchanged.
    pub async fn approve(&self, id: &str, notes: Option<String>) -> Result<TaskCompletion> {
        let _busy = self.inflight.try_begin(format!("completion {id}"))?;
        let completion = self.find(id).await?;

        match completion.status {
            CompletionStatus::Approved => return Ok(completion),
            CompletionStatus::Rejected => return Err(already_processed(&completion)),
            CompletionStatus::PendingReview => {},
        }

        let tx = self.ledger.prepare(
            NewTransaction::new(&completion.user_id, TransactionType::TaskEarning, completion.earning)
                .related_to(id)
                .describe("Task reward"),
        )?;
        let review = Review {
            completion_id: id.to_owned(),
            status: CompletionStatus::Approved,
            reviewed_at: self.clock.now(),
            notes,
        };
        let completion = self.store.review_completion(&review, Some(tx.clone())).await?;
        ledger::record(&Appended::Created(tx));

        self.reviewed(&completion);
        Ok(completion)
    }

    /// Closes the submission without a ledger entry.
    pub async fn reject(&self, id: &str, reason: &str) -> Result<TaskCompletion> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::EmptyReason.into());
        }

        let _busy = self.inflight.try_begin(format!("completion {id}"))?;
        let completion = self.find(id).await?;

        match completion.status {
            CompletionStatus::Rejected => return Ok(completion),
            CompletionStatus::Approved => return Err(already_processed(&completion)),
            CompletionStatus::PendingReview => {},
        }

        let review = Review {
            completion_id: id.to_owned(),
            status: CompletionStatus::Rejected,
            reviewed_at: self.clock.now(),
            notes: Some(reason.to_owned()),
        };
        let completion = self.store.review_completion(&review, None).await?;

        self.reviewed(&completion);
        Ok(completion)
    }

    fn reviewed(&self, completion: &TaskCompletion) {
        metrics::counter!("task_completions_total", "status" => completion.status.as_str()).increment(1);
        tracing::info!(
            completion_id = %completion.id,
            user_id = %completion.user_id,
            status = %completion.status,
            "task completion reviewed"
        );
    }

    pub async fn find(&self, id: &str) -> Result<TaskCompletion> {
        self.store
            .find_completion(id)
            .await?
            .ok_or(Error::not_found("task completion"))
    }

    /// Completions of a user, newest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<TaskCompletion>> {
        self.store.list_completions(Some(user_id), None).await
    }

    pub async fn list(&self, status: Option<CompletionStatus>) -> Result<Vec<TaskCompletion>> {
        self.store.list_completions(None, status).await
    }
}

fn already_processed(completion: &TaskCompletion) -> Error {
    ValidationError::AlreadyProcessed {
        entity: "task completion",
        status: completion.status.to_string(),
    }
    .into()
}
