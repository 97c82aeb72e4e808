//! Proof of identity at login.

use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::config;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payload of the Telegram login widget.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelegramAuth {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub photo_url: Option<String>,
    pub auth_date: i64,
    pub hash: String,
}

impl TelegramAuth {
    /// Present fields except `hash`, as sorted `key=value` lines.
    fn data_check_string(&self) -> String {
        let mut fields = vec![
            format!("auth_date={}", self.auth_date),
            format!("first_name={}", self.first_name),
            format!("id={}", self.id),
        ];
        if let Some(last_name) = &self.last_name {
            fields.push(format!("last_name={last_name}"));
        }
        if let Some(photo_url) = &self.photo_url {
            fields.push(format!("photo_url={photo_url}"));
        }
        if let Some(username) = &self.username {
            fields.push(format!("username={username}"));
        }
        fields.sort();
        fields.join("\n")
    }

    /// Name shown for a user created from this login.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => username.clone(),
            _ => self.first_name.clone(),
        }
    }
}

/// Checks login widget payloads signed with the bot token.
#[derive(Clone)]
pub struct TelegramVerifier {
    secret: Vec<u8>,
    max_age_secs: i64,
    clock: Arc<dyn Clock>,
}

impl TelegramVerifier {
    pub fn new(config: &config::Telegram, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: Sha256::digest(config.bot_token.as_bytes()).to_vec(),
            max_age_secs: i64::try_from(config.max_auth_age_secs).unwrap_or(i64::MAX),
            clock,
        }
    }

    fn sign(&self, auth: &TelegramAuth) -> Result<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|err| Error::internal(err.to_string()))?;
        mac.update(auth.data_check_string().as_bytes());
        Ok(mac)
    }

    pub fn verify(&self, auth: &TelegramAuth) -> Result<()> {
        let expected = hex::decode(&auth.hash).map_err(|_| Error::Unauthorized)?;
        self.sign(auth)?.verify_slice(&expected).map_err(|_| {
            tracing::warn!(telegram_id = auth.id, "telegram login with a bad signature");
            Error::Unauthorized
        })?;

        let age = self.clock.now().timestamp() - auth.auth_date;
        if age > self.max_age_secs {
            tracing::warn!(telegram_id = auth.id, age, "telegram login is too old");
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn hash(&self, auth: &TelegramAuth) -> String {
        hex::encode(self.sign(auth).unwrap().finalize().into_bytes())
    }
}

/// Administrator credentials checked against an Argon2 PHC string.
#[derive(Clone)]
pub struct AdminVerifier {
    username: String,
    password_hash: String,
}

impl AdminVerifier {
    pub fn new(config: &config::Admin) -> Self {
        Self {
            username: config.username.clone(),
            password_hash: config.password_hash.clone(),
        }
    }

    pub fn verify(&self, username: &str, password: &str) -> Result<()> {
        let parsed = PasswordHash::new(&self.password_hash)
            .map_err(|err| Error::internal(format!("admin password hash: {err}")))?;
        let valid = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();

        if valid && username == self.username {
            Ok(())
        } else {
            tracing::warn!(%username, "failed administrator login");
            Err(Error::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use argon2::password_hash::{PasswordHasher, SaltString};
    use chrono::{TimeDelta, Utc};
    use rand::rngs::OsRng;

    use super::*;
    use crate::clock::FixedClock;

    fn verifier() -> (Arc<FixedClock>, TelegramVerifier) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let config = config::Telegram {
            bot_token: "123456:ABC-DEF".into(),
            max_auth_age_secs: 3600,
        };
        (clock.clone(), TelegramVerifier::new(&config, clock))
    }

    fn payload(verifier: &TelegramVerifier, now: i64) -> TelegramAuth {
        let mut auth = TelegramAuth {
            id: 42,
            first_name: "Alice".into(),
            username: Some("alice".into()),
            auth_date: now,
            ..Default::default()
        };
        auth.hash = verifier.hash(&auth);
        auth
    }

    #[test]
    fn test_data_check_string_is_sorted() {
        let auth = TelegramAuth {
            id: 7,
            first_name: "Bob".into(),
            username: Some("bob".into()),
            auth_date: 100,
            hash: "ignored".into(),
            ..Default::default()
        };
        assert_eq!(
            auth.data_check_string(),
            "auth_date=100\nfirst_name=Bob\nid=7\nusername=bob"
        );
    }

    #[test]
    fn test_signed_payload_accepted() {
        let (clock, verifier) = verifier();
        let auth = payload(&verifier, clock.now().timestamp());

        assert!(verifier.verify(&auth).is_ok());
        assert_eq!(auth.display_name(), "alice");
    }

    #[test]
    fn test_tampered_or_stale_payload_refused() {
        let (clock, verifier) = verifier();
        let mut auth = payload(&verifier, clock.now().timestamp());

        auth.id = 43;
        assert!(matches!(verifier.verify(&auth), Err(Error::Unauthorized)));

        let auth = payload(&verifier, clock.now().timestamp());
        clock.advance(TimeDelta::hours(2));
        assert!(matches!(verifier.verify(&auth), Err(Error::Unauthorized)));
    }

    #[test]
    fn test_admin_password() {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"correct horse", &salt)
            .unwrap()
            .to_string();
        let verifier = AdminVerifier::new(&config::Admin {
            username: "root".into(),
            password_hash: hash,
        });

        assert!(verifier.verify("root", "correct horse").is_ok());
        assert!(matches!(verifier.verify("root", "wrong"), Err(Error::Unauthorized)));
        assert!(matches!(verifier.verify("admin", "correct horse"), Err(Error::Unauthorized)));
    }
}
