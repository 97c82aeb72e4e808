//! Ad and task catalog managed by administrators.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::clock::Clock;
use crate::error::{Error, Result, ValidationError};
use crate::model::{Ad, AdOption, Task, TaskStatus, new_id};
use crate::settings::PlatformSettingsStore;
use crate::store::Store;

#[derive(Clone, Debug, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAd {
    #[validate(length(min = 1, max = 200, message = "Title must not be empty."))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: Option<String>,
    pub ad_link: Option<String>,
    /// Defaults to the tier rate from platform settings.
    pub earning_per_view: Option<Decimal>,
    #[serde(rename = "type")]
    pub kind: AdOption,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdPatch {
    #[validate(length(min = 1, max = 200, message = "Title must not be empty."))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub ad_link: Option<String>,
    pub earning_per_view: Option<Decimal>,
    #[serde(rename = "type")]
    pub kind: Option<AdOption>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    #[validate(length(min = 1, max = 200, message = "Title must not be empty."))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub earning: Decimal,
    pub link: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[validate(length(min = 1, max = 200, message = "Title must not be empty."))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub earning: Option<Decimal>,
    pub link: Option<String>,
    pub status: Option<TaskStatus>,
    pub admin_notes: Option<String>,
}

fn ensure_positive(amount: Decimal) -> std::result::Result<(), ValidationError> {
    if amount > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::NonPositiveAmount)
    }
}

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
    settings: PlatformSettingsStore,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>, settings: PlatformSettingsStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Active ads of a tier, in catalog order.
    pub async fn active_ads(&self, kind: AdOption) -> Result<Vec<Ad>> {
        let mut ads = self.store.list_ads(Some(kind)).await?;
        ads.retain(|ad| ad.is_active);
        Ok(ads)
    }

    pub async fn ads(&self) -> Result<Vec<Ad>> {
        self.store.list_ads(None).await
    }

    pub async fn ad(&self, id: &str) -> Result<Ad> {
        self.store.find_ad(id).await?.ok_or(Error::not_found("ad"))
    }

    pub async fn create_ad(&self, new: NewAd) -> Result<Ad> {
        new.validate()?;
        let earning_per_view = match new.earning_per_view {
            Some(earning) => earning,
            None => self.settings.get().await?.earning_per_ad(new.kind),
        };
        ensure_positive(earning_per_view)?;

        let ad = Ad {
            id: new_id(),
            title: new.title,
            description: new.description,
            image_url: new.image_url,
            ad_link: new.ad_link,
            earning_per_view,
            kind: new.kind,
            is_active: new.is_active.unwrap_or(true),
            created_at: self.clock.now(),
        };
        self.store.insert_ad(&ad).await?;

        tracing::info!(ad_id = %ad.id, r#type = %ad.kind, earning = %ad.earning_per_view, "ad created");
        Ok(ad)
    }

    /// Rate changes only affect views credited afterwards. Past entries
    /// keep the amount they were written with.
    pub async fn update_ad(&self, id: &str, patch: AdPatch) -> Result<Ad> {
        patch.validate()?;
        let mut ad = self.ad(id).await?;

        if let Some(earning) = patch.earning_per_view {
            ensure_positive(earning)?;
            ad.earning_per_view = earning;
        }
        if let Some(title) = patch.title {
            ad.title = title;
        }
        if let Some(description) = patch.description {
            ad.description = description;
        }
        if patch.image_url.is_some() {
            ad.image_url = patch.image_url;
        }
        if patch.ad_link.is_some() {
            ad.ad_link = patch.ad_link;
        }
        if let Some(kind) = patch.kind {
            ad.kind = kind;
        }
        if let Some(is_active) = patch.is_active {
            ad.is_active = is_active;
        }

        self.store.update_ad(&ad).await?;
        Ok(ad)
    }

    pub async fn delete_ad(&self, id: &str) -> Result<()> {
        if self.store.delete_ad(id).await? {
            tracing::info!(ad_id = %id, "ad deleted");
            Ok(())
        } else {
            Err(Error::not_found("ad"))
        }
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.store.list_tasks().await
    }

    /// Tasks users may still submit proof for.
    pub async fn open_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks = self.store.list_tasks().await?;
        tasks.retain(Task::is_open);
        Ok(tasks)
    }

    pub async fn task(&self, id: &str) -> Result<Task> {
        self.store.find_task(id).await?.ok_or(Error::not_found("task"))
    }

    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        new.validate()?;
        ensure_positive(new.earning)?;

        let task = Task {
            id: new_id(),
            title: new.title,
            description: new.description,
            earning: new.earning,
            status: new.status.unwrap_or_default(),
            link: new.link,
            admin_notes: None,
            created_at: self.clock.now(),
        };
        self.store.insert_task(&task).await?;

        tracing::info!(task_id = %task.id, earning = %task.earning, "task created");
        Ok(task)
    }

    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        patch.validate()?;
        let mut task = self.task(id).await?;

        if let Some(earning) = patch.earning {
            ensure_positive(earning)?;
            task.earning = earning;
        }
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if patch.link.is_some() {
            task.link = patch.link;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if patch.admin_notes.is_some() {
            task.admin_notes = patch.admin_notes;
        }

        self.store.update_task(&task).await?;
        Ok(task)
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        if self.store.delete_task(id).await? {
            tracing::info!(task_id = %id, "task deleted");
            Ok(())
        } else {
            Err(Error::not_found("task"))
        }
    }
}
