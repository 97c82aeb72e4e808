//! PostgreSQL store. Each port method runs in its own database transaction
//! when it touches more than one row.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};

use super::{
    Appended, CatalogRepository, LedgerRepository, QuotaState, Review, SettingsRepository,
    Settlement, UserRepository,
};
use crate::database::Database;
use crate::error::{Error, Result, ValidationError};
use crate::model::{
    Ad, AdOption, CompletionStatus, DeviceInfo, Task, TaskCompletion, Transaction,
    TransactionType, User, Withdrawal, WithdrawalStatus,
};
use crate::settings::PlatformSettings;

const USER_COLUMNS: &str = "id, telegram_id, username, balance, daily_ads_watched, \
    daily_ads_limit, ad_option, quota_day, is_banned, device_info, created_at";
const AD_COLUMNS: &str =
    "id, title, description, image_url, ad_link, earning_per_view, kind, is_active, created_at";
const TASK_COLUMNS: &str = "id, title, description, earning, status, link, admin_notes, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, kind, amount, description, timestamp, related_entity_id";
const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, amount, method, details, status, requested_at, processed_at, admin_notes";
const COMPLETION_COLUMNS: &str = "id, user_id, task_id, completed_at, earning, status, \
    submission_details, reviewed_at, review_notes";

fn to_int(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::internal("counter out of range"))
}

fn from_int(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::internal("negative counter in database"))
}

#[derive(FromRow)]
struct UserRecord {
    id: String,
    telegram_id: String,
    username: String,
    balance: Decimal,
    daily_ads_watched: i32,
    daily_ads_limit: i32,
    ad_option: String,
    quota_day: NaiveDate,
    is_banned: bool,
    device_info: Option<Json<DeviceInfo>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = Error;

    fn try_from(record: UserRecord) -> Result<Self> {
        Ok(User {
            id: record.id,
            telegram_id: record.telegram_id,
            username: record.username,
            balance: record.balance,
            daily_ads_watched: from_int(record.daily_ads_watched)?,
            daily_ads_limit: from_int(record.daily_ads_limit)?,
            ad_option: record.ad_option.parse()?,
            quota_day: record.quota_day,
            is_banned: record.is_banned,
            is_admin: false,
            device_info: record.device_info.map(|Json(device)| device),
            created_at: record.created_at,
        })
    }
}

#[derive(FromRow)]
struct AdRecord {
    id: String,
    title: String,
    description: String,
    image_url: Option<String>,
    ad_link: Option<String>,
    earning_per_view: Decimal,
    kind: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<AdRecord> for Ad {
    type Error = Error;

    fn try_from(record: AdRecord) -> Result<Self> {
        Ok(Ad {
            id: record.id,
            title: record.title,
            description: record.description,
            image_url: record.image_url,
            ad_link: record.ad_link,
            earning_per_view: record.earning_per_view,
            kind: record.kind.parse()?,
            is_active: record.is_active,
            created_at: record.created_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRecord {
    id: String,
    title: String,
    description: String,
    earning: Decimal,
    status: String,
    link: Option<String>,
    admin_notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRecord> for Task {
    type Error = Error;

    fn try_from(record: TaskRecord) -> Result<Self> {
        Ok(Task {
            id: record.id,
            title: record.title,
            description: record.description,
            earning: record.earning,
            status: record.status.parse()?,
            link: record.link,
            admin_notes: record.admin_notes,
            created_at: record.created_at,
        })
    }
}

#[derive(FromRow)]
struct TransactionRecord {
    id: String,
    user_id: String,
    kind: String,
    amount: Decimal,
    description: String,
    timestamp: DateTime<Utc>,
    related_entity_id: Option<String>,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = Error;

    fn try_from(record: TransactionRecord) -> Result<Self> {
        Ok(Transaction {
            id: record.id,
            user_id: record.user_id,
            kind: record.kind.parse()?,
            amount: record.amount,
            description: record.description,
            timestamp: record.timestamp,
            related_entity_id: record.related_entity_id,
        })
    }
}

#[derive(FromRow)]
struct WithdrawalRecord {
    id: String,
    user_id: String,
    amount: Decimal,
    method: String,
    details: String,
    status: String,
    requested_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    admin_notes: Option<String>,
}

impl TryFrom<WithdrawalRecord> for Withdrawal {
    type Error = Error;

    fn try_from(record: WithdrawalRecord) -> Result<Self> {
        Ok(Withdrawal {
            id: record.id,
            user_id: record.user_id,
            amount: record.amount,
            method: record.method.parse()?,
            details: record.details,
            status: record.status.parse()?,
            requested_at: record.requested_at,
            processed_at: record.processed_at,
            admin_notes: record.admin_notes,
        })
    }
}

#[derive(FromRow)]
struct CompletionRecord {
    id: String,
    user_id: String,
    task_id: String,
    completed_at: DateTime<Utc>,
    earning: Decimal,
    status: String,
    submission_details: String,
    reviewed_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
}

impl TryFrom<CompletionRecord> for TaskCompletion {
    type Error = Error;

    fn try_from(record: CompletionRecord) -> Result<Self> {
        Ok(TaskCompletion {
            id: record.id,
            user_id: record.user_id,
            task_id: record.task_id,
            completed_at: record.completed_at,
            earning: record.earning,
            status: record.status.parse()?,
            submission_details: record.submission_details,
            reviewed_at: record.reviewed_at,
            review_notes: record.review_notes,
        })
    }
}

#[derive(FromRow)]
struct SettingsRecord {
    earning_per_ad1: Decimal,
    earning_per_ad2: Decimal,
    daily_limit1: i32,
    daily_limit2: i32,
    min_withdrawal: Decimal,
}

fn convert<R, T>(records: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    records.into_iter().map(T::try_from).collect()
}

/// Inserts `tx` unless its key exists and moves the cached balance.
/// Returns whether a row was written.
async fn write_entry(conn: &mut PgConnection, tx: &Transaction) -> Result<bool> {
    let inserted = sqlx::query(
        "INSERT INTO transactions (id, user_id, kind, amount, description, timestamp, related_entity_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (related_entity_id, kind) WHERE related_entity_id IS NOT NULL DO NOTHING",
    )
    .bind(&tx.id)
    .bind(&tx.user_id)
    .bind(tx.kind.as_str())
    .bind(tx.amount)
    .bind(&tx.description)
    .bind(tx.timestamp)
    .bind(&tx.related_entity_id)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    if inserted {
        let updated = sqlx::query("UPDATE users SET balance = balance + $1 WHERE id = $2")
            .bind(tx.amount)
            .bind(&tx.user_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::not_found("user"));
        }
    }
    Ok(inserted)
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.postgres.clone(),
        }
    }

    async fn existing(&self, tx: &Transaction) -> Result<Transaction> {
        let key = tx
            .related_entity_id
            .as_deref()
            .ok_or(Error::internal("unkeyed transaction reported as duplicate"))?;
        self.find_transaction(key, tx.kind)
            .await?
            .ok_or(Error::internal("duplicate transaction vanished"))
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_telegram(&self, telegram_id: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?
        .map(User::try_from)
        .transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO users (id, telegram_id, username, balance, daily_ads_watched, daily_ads_limit,
                ad_option, quota_day, is_banned, device_info, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT DO NOTHING",
        )
        .bind(&user.id)
        .bind(&user.telegram_id)
        .bind(&user.username)
        .bind(user.balance)
        .bind(to_int(user.daily_ads_watched)?)
        .bind(to_int(user.daily_ads_limit)?)
        .bind(user.ad_option.as_str())
        .bind(user.quota_day)
        .bind(user.is_banned)
        .bind(user.device_info.clone().map(Json))
        .bind(user.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(Error::Conflict("user already exists".into()));
        }
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    async fn set_banned(&self, id: &str, banned: bool) -> Result<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "UPDATE users SET is_banned = $1 WHERE id = $2 RETURNING {USER_COLUMNS}"
        ))
        .bind(banned)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::not_found("user"))?
        .try_into()
    }

    async fn save_quota(&self, id: &str, quota: &QuotaState) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE users SET daily_ads_watched = $1, daily_ads_limit = $2, ad_option = $3, quota_day = $4
             WHERE id = $5",
        )
        .bind(to_int(quota.daily_ads_watched)?)
        .bind(to_int(quota.daily_ads_limit)?)
        .bind(quota.ad_option.as_str())
        .bind(quota.quota_day)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::not_found("user"));
        }
        Ok(())
    }

    async fn select_ad_option(&self, id: &str, quota: &QuotaState) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE users SET daily_ads_watched = $1, daily_ads_limit = $2, ad_option = $3, quota_day = $4
             WHERE id = $5 AND (quota_day <> $4 OR daily_ads_watched = 0)",
        )
        .bind(to_int(quota.daily_ads_watched)?)
        .bind(to_int(quota.daily_ads_limit)?)
        .bind(quota.ad_option.as_str())
        .bind(quota.quota_day)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return match self.find_user(id).await? {
                Some(_) => Err(ValidationError::OptionLocked.into()),
                None => Err(Error::not_found("user")),
            };
        }
        Ok(())
    }

    async fn save_device_info(&self, id: &str, device: &DeviceInfo) -> Result<()> {
        let updated = sqlx::query("UPDATE users SET device_info = $1 WHERE id = $2")
            .bind(Json(device))
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::not_found("user"));
        }
        Ok(())
    }

    async fn fingerprint_in_use(&self, fingerprint: &str, except: &str) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM users WHERE device_info ->> 'deviceFingerprint' = $1 AND id <> $2
            )",
        )
        .bind(fingerprint)
        .bind(except)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn set_cached_balance(&self, id: &str, balance: Decimal) -> Result<()> {
        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn list_ads(&self, kind: Option<AdOption>) -> Result<Vec<Ad>> {
        let records = sqlx::query_as::<_, AdRecord>(&format!(
            "SELECT {AD_COLUMNS} FROM ads WHERE $1::TEXT IS NULL OR kind = $1 ORDER BY seq"
        ))
        .bind(kind.map(|kind| kind.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    async fn find_ad(&self, id: &str) -> Result<Option<Ad>> {
        sqlx::query_as::<_, AdRecord>(&format!("SELECT {AD_COLUMNS} FROM ads WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Ad::try_from)
            .transpose()
    }

    async fn insert_ad(&self, ad: &Ad) -> Result<()> {
        sqlx::query(
            "INSERT INTO ads (id, title, description, image_url, ad_link, earning_per_view, kind, is_active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&ad.id)
        .bind(&ad.title)
        .bind(&ad.description)
        .bind(&ad.image_url)
        .bind(&ad.ad_link)
        .bind(ad.earning_per_view)
        .bind(ad.kind.as_str())
        .bind(ad.is_active)
        .bind(ad.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_ad(&self, ad: &Ad) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE ads SET title = $1, description = $2, image_url = $3, ad_link = $4,
                earning_per_view = $5, kind = $6, is_active = $7
             WHERE id = $8",
        )
        .bind(&ad.title)
        .bind(&ad.description)
        .bind(&ad.image_url)
        .bind(&ad.ad_link)
        .bind(ad.earning_per_view)
        .bind(ad.kind.as_str())
        .bind(ad.is_active)
        .bind(&ad.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::not_found("ad"));
        }
        Ok(())
    }

    async fn delete_ad(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM ads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let records =
            sqlx::query_as::<_, TaskRecord>(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY seq"))
                .fetch_all(&self.pool)
                .await?;
        convert(records)
    }

    async fn find_task(&self, id: &str) -> Result<Option<Task>> {
        sqlx::query_as::<_, TaskRecord>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Task::try_from)
            .transpose()
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO tasks (id, title, description, earning, status, link, admin_notes, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.earning)
        .bind(task.status.as_str())
        .bind(&task.link)
        .bind(&task.admin_notes)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE tasks SET title = $1, description = $2, earning = $3, status = $4, link = $5,
                admin_notes = $6
             WHERE id = $7",
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.earning)
        .bind(task.status.as_str())
        .bind(&task.link)
        .bind(&task.admin_notes)
        .bind(&task.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::not_found("task"));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn append_transaction(&self, tx: Transaction) -> Result<Appended> {
        let mut db = self.pool.begin().await?;
        if write_entry(&mut *db, &tx).await? {
            db.commit().await?;
            Ok(Appended::Created(tx))
        } else {
            db.rollback().await?;
            Ok(Appended::Duplicate(self.existing(&tx).await?))
        }
    }

    async fn credit_ad_view(&self, tx: Transaction, quota: &QuotaState) -> Result<Appended> {
        let mut db = self.pool.begin().await?;
        if !write_entry(&mut *db, &tx).await? {
            db.rollback().await?;
            return Ok(Appended::Duplicate(self.existing(&tx).await?));
        }

        let updated = sqlx::query(
            "UPDATE users SET daily_ads_watched = $1, daily_ads_limit = $2, ad_option = $3, quota_day = $4
             WHERE id = $5 AND (quota_day <> $4 OR daily_ads_watched = $1 - 1)",
        )
        .bind(to_int(quota.daily_ads_watched)?)
        .bind(to_int(quota.daily_ads_limit)?)
        .bind(quota.ad_option.as_str())
        .bind(quota.quota_day)
        .bind(&tx.user_id)
        .execute(&mut *db)
        .await?
        .rows_affected();

        if updated == 0 {
            db.rollback().await?;
            return Err(Error::Conflict("quota changed concurrently".into()));
        }

        db.commit().await?;
        Ok(Appended::Created(tx))
    }

    async fn find_transaction(
        &self,
        related_entity_id: &str,
        kind: TransactionType,
    ) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE related_entity_id = $1 AND kind = $2"
        ))
        .bind(related_entity_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Transaction::try_from)
        .transpose()
    }

    async fn list_transactions(&self, user_id: Option<&str>) -> Result<Vec<Transaction>> {
        let records = sqlx::query_as::<_, TransactionRecord>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE $1::TEXT IS NULL OR user_id = $1 ORDER BY seq"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    async fn sum_transactions(&self, user_id: &str) -> Result<Decimal> {
        let sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM transactions WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum)
    }

    async fn insert_withdrawal(&self, withdrawal: &Withdrawal, tx: Transaction) -> Result<()> {
        let mut db = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO withdrawals (id, user_id, amount, method, details, status, requested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&withdrawal.id)
        .bind(&withdrawal.user_id)
        .bind(withdrawal.amount)
        .bind(withdrawal.method.as_str())
        .bind(&withdrawal.details)
        .bind(withdrawal.status.as_str())
        .bind(withdrawal.requested_at)
        .execute(&mut *db)
        .await?;

        if !write_entry(&mut *db, &tx).await? {
            db.rollback().await?;
            return Err(Error::Conflict("withdrawal already recorded".into()));
        }
        db.commit().await?;
        Ok(())
    }

    async fn find_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>> {
        sqlx::query_as::<_, WithdrawalRecord>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Withdrawal::try_from)
        .transpose()
    }

    async fn list_withdrawals(
        &self,
        user_id: Option<&str>,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>> {
        let records = sqlx::query_as::<_, WithdrawalRecord>(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals
             WHERE ($1::TEXT IS NULL OR user_id = $1) AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY seq DESC"
        ))
        .bind(user_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    async fn settle_withdrawal(&self, settlement: &Settlement, tx: Transaction) -> Result<Withdrawal> {
        let mut db = self.pool.begin().await?;
        let settled = sqlx::query_as::<_, WithdrawalRecord>(&format!(
            "UPDATE withdrawals SET status = $1, processed_at = $2, admin_notes = $3
             WHERE id = $4 AND status = 'pending'
             RETURNING {WITHDRAWAL_COLUMNS}"
        ))
        .bind(settlement.status.as_str())
        .bind(settlement.processed_at)
        .bind(&settlement.admin_notes)
        .bind(&settlement.withdrawal_id)
        .fetch_optional(&mut *db)
        .await?;

        let Some(settled) = settled else {
            db.rollback().await?;
            let current = self
                .find_withdrawal(&settlement.withdrawal_id)
                .await?
                .ok_or(Error::not_found("withdrawal"))?;
            return Err(ValidationError::AlreadyProcessed {
                entity: "withdrawal",
                status: current.status.to_string(),
            }
            .into());
        };

        write_entry(&mut *db, &tx).await?;
        db.commit().await?;
        settled.try_into()
    }

    async fn insert_completion(&self, completion: &TaskCompletion) -> Result<()> {
        let inserted = sqlx::query(
            "INSERT INTO task_completions (id, user_id, task_id, completed_at, earning, status, submission_details)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (user_id, task_id) WHERE status = 'pending_review' DO NOTHING",
        )
        .bind(&completion.id)
        .bind(&completion.user_id)
        .bind(&completion.task_id)
        .bind(completion.completed_at)
        .bind(completion.earning)
        .bind(completion.status.as_str())
        .bind(&completion.submission_details)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(ValidationError::SubmissionPending.into());
        }
        Ok(())
    }

    async fn find_completion(&self, id: &str) -> Result<Option<TaskCompletion>> {
        sqlx::query_as::<_, CompletionRecord>(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM task_completions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(TaskCompletion::try_from)
        .transpose()
    }

    async fn list_completions(
        &self,
        user_id: Option<&str>,
        status: Option<CompletionStatus>,
    ) -> Result<Vec<TaskCompletion>> {
        let records = sqlx::query_as::<_, CompletionRecord>(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM task_completions
             WHERE ($1::TEXT IS NULL OR user_id = $1) AND ($2::TEXT IS NULL OR status = $2)
             ORDER BY seq DESC"
        ))
        .bind(user_id)
        .bind(status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert(records)
    }

    async fn review_completion(
        &self,
        review: &Review,
        tx: Option<Transaction>,
    ) -> Result<TaskCompletion> {
        let mut db = self.pool.begin().await?;
        let reviewed = sqlx::query_as::<_, CompletionRecord>(&format!(
            "UPDATE task_completions SET status = $1, reviewed_at = $2, review_notes = $3
             WHERE id = $4 AND status = 'pending_review'
             RETURNING {COMPLETION_COLUMNS}"
        ))
        .bind(review.status.as_str())
        .bind(review.reviewed_at)
        .bind(&review.notes)
        .bind(&review.completion_id)
        .fetch_optional(&mut *db)
        .await?;

        let Some(reviewed) = reviewed else {
            db.rollback().await?;
            let current = self
                .find_completion(&review.completion_id)
                .await?
                .ok_or(Error::not_found("task completion"))?;
            return Err(ValidationError::AlreadyProcessed {
                entity: "task completion",
                status: current.status.to_string(),
            }
            .into());
        };

        if let Some(tx) = tx {
            write_entry(&mut *db, &tx).await?;
        }
        db.commit().await?;
        reviewed.try_into()
    }
}

#[async_trait]
impl SettingsRepository for PgStore {
    async fn load_settings(&self) -> Result<Option<PlatformSettings>> {
        let record = sqlx::query_as::<_, SettingsRecord>(
            "SELECT earning_per_ad1, earning_per_ad2, daily_limit1, daily_limit2, min_withdrawal
             FROM platform_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        record
            .map(|record| {
                Ok(PlatformSettings {
                    earning_per_ad1: record.earning_per_ad1,
                    earning_per_ad2: record.earning_per_ad2,
                    daily_limit1: from_int(record.daily_limit1)?,
                    daily_limit2: from_int(record.daily_limit2)?,
                    min_withdrawal: record.min_withdrawal,
                })
            })
            .transpose()
    }

    async fn save_settings(&self, settings: &PlatformSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO platform_settings (id, earning_per_ad1, earning_per_ad2, daily_limit1, daily_limit2, min_withdrawal)
             VALUES (1, $1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET
                earning_per_ad1 = EXCLUDED.earning_per_ad1,
                earning_per_ad2 = EXCLUDED.earning_per_ad2,
                daily_limit1 = EXCLUDED.daily_limit1,
                daily_limit2 = EXCLUDED.daily_limit2,
                min_withdrawal = EXCLUDED.min_withdrawal",
        )
        .bind(settings.earning_per_ad1)
        .bind(settings.earning_per_ad2)
        .bind(to_int(settings.daily_limit1)?)
        .bind(to_int(settings.daily_limit2)?)
        .bind(settings.min_withdrawal)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
