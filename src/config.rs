//! Configuration manager for adearn.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;
use crate::settings::PlatformSettings;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DWELL_SECONDS: u64 = 10;
const DEFAULT_AUTH_AGE_SECS: u64 = 86_400;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    /// Listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    /// The in-memory store is used when absent.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Administrator credentials.
    #[serde(skip_serializing)]
    pub admin: Option<Admin>,
    /// Telegram login widget.
    #[serde(skip_serializing)]
    pub telegram: Option<Telegram>,
    #[serde(default)]
    pub engine: Engine,
    /// Platform settings used until an administrator saves new ones.
    #[serde(default)]
    pub defaults: PlatformSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: String::default(),
            port: DEFAULT_PORT,
            version: String::default(),
            path: PathBuf::default(),
            postgres: None,
            token: None,
            admin: None,
            telegram: None,
            engine: Engine::default(),
            defaults: PlatformSettings::default(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Json Web Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    pub public_key_pem: String,
    pub private_key_pem: String,
    /// Update token audience.
    pub audience: Option<String>,
}

/// Single administrator account.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Admin {
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Telegram {
    pub bot_token: String,
    /// Oldest accepted `auth_date`, in seconds.
    #[serde(default = "default_auth_age")]
    pub max_auth_age_secs: u64,
}

fn default_auth_age() -> u64 {
    DEFAULT_AUTH_AGE_SECS
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Engine {
    /// Seconds an ad stays on screen before it can be credited.
    pub dwell_seconds: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            dwell_seconds: DEFAULT_DWELL_SECONDS,
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Path taken from `CONFIG_PATH`, if set.
    pub fn path_from_env(self) -> Self {
        match std::env::var("CONFIG_PATH") {
            Ok(path) => self.path(PathBuf::from(path)),
            Err(_) => self,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();
                config.path = file_path.clone();

                if !config.url.is_empty() {
                    config.url = self.normalize_url(&config.url)?;
                }

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file cannot be read, using defaults");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/adearn.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.engine.dwell_seconds, 10);
        assert!(config.postgres.is_none());
        assert_eq!(config.version(), VERSION);
    }

    #[test]
    fn test_read_yaml() {
        let path = std::env::temp_dir().join(format!("adearn-{}.yaml", crate::model::new_id()));
        let mut file = File::create(&path).unwrap();
        write!(
            file,
            "name: adearn\nurl: earn.example.com\nport: 9000\nengine:\n  dwell_seconds: 5\ndefaults:\n  earningPerAd1: 0.05\n  earningPerAd2: 0.1\n  dailyLimit1: 20\n  dailyLimit2: 40\n  minWithdrawal: 5\ntelegram:\n  bot_token: \"123:abc\"\n"
        )
        .unwrap();

        let config = Configuration::default().path(path.clone()).read().unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(config.url, "https://earn.example.com/");
        assert_eq!(config.port, 9000);
        assert_eq!(config.engine.dwell_seconds, 5);
        assert_eq!(config.defaults.daily_limit1, 20);
        assert_eq!(config.defaults.min_withdrawal, Decimal::new(5, 0));
        assert_eq!(config.telegram.as_ref().unwrap().max_auth_age_secs, 86_400);
    }
}
