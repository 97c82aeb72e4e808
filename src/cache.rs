//! Client-side identity cache persisted as a JSON file.
//!
//! Values read back from disk are stale until the user has been fetched
//! again from the server. They only serve as a first paint.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::dto::UserView;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    CurrentUser,
    IsAdmin,
    Token,
    AdminUsername,
}

impl CacheKey {
    /// Name of the entry in the file.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::CurrentUser => "currentUser",
            CacheKey::IsAdmin => "isAdmin",
            CacheKey::Token => "token",
            CacheKey::AdminUsername => "adminUsername",
        }
    }
}

#[derive(Debug)]
pub struct IdentityCache {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
    stale: bool,
}

impl IdentityCache {
    /// Reads the cache at `path`. A missing file is an empty cache.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            stale: !entries.is_empty(),
            path,
            entries,
        })
    }

    pub fn get<T: DeserializeOwned>(&self, key: CacheKey) -> Option<T> {
        let value = self.entries.get(key.as_str())?;
        match serde_json::from_value(value.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(?key, error = %err, "ignoring unreadable cache entry");
                None
            },
        }
    }

    pub fn set<T: Serialize>(&mut self, key: CacheKey, value: &T) -> Result<()> {
        self.entries.insert(key.as_str().to_owned(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn remove(&mut self, key: CacheKey) {
        self.entries.remove(key.as_str());
    }

    pub fn current_user(&self) -> Option<UserView> {
        self.get(CacheKey::CurrentUser)
    }

    pub fn is_admin(&self) -> bool {
        self.get(CacheKey::IsAdmin).unwrap_or(false)
    }

    pub fn token(&self) -> Option<String> {
        self.get(CacheKey::Token)
    }

    /// Whether the cached user has not been confirmed by the server since
    /// it was read from disk.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Stores a fresh login and writes it to disk.
    pub async fn save_session(&mut self, token: &str, is_admin: bool, user: Option<&UserView>) -> Result<()> {
        self.entries.clear();
        self.set(CacheKey::Token, &token)?;
        self.set(CacheKey::IsAdmin, &is_admin)?;
        if let Some(user) = user {
            self.set(CacheKey::CurrentUser, user)?;
        }
        self.stale = false;
        self.persist().await
    }

    /// Replaces the cached user with one fetched from the server.
    pub async fn refresh_user(&mut self, user: &UserView) -> Result<()> {
        self.set(CacheKey::CurrentUser, user)?;
        self.stale = false;
        self.persist().await
    }

    /// Forgets everything, on disk too.
    pub async fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.stale = false;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes through a temporary file so a crash never leaves half a cache.
    pub async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
