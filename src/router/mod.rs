//! HTTP handlers.

pub mod admin;
pub mod ads;
pub mod auth;
pub mod status;
pub mod tasks;
pub mod user;
pub mod withdrawal;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::{Error, Result};
use crate::token::Claims;

/// JSON body checked with its `validator` rules before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// User a read acts on: `requested` when given, the caller otherwise.
/// Only administrators may read another user.
pub fn target(claims: &Claims, requested: Option<String>) -> Result<String> {
    match requested {
        Some(user_id) if user_id != claims.sub && !claims.admin => Err(Error::Forbidden),
        Some(user_id) => Ok(user_id),
        None => Ok(claims.sub.clone()),
    }
}

/// User a write acts on: always the caller. Administrators move balances
/// through adjustments only, so naming anyone else is refused.
pub fn caller(claims: &Claims, requested: Option<String>) -> Result<String> {
    match requested {
        Some(user_id) if user_id != claims.sub => Err(Error::Forbidden),
        _ => Ok(claims.sub.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(sub: &str, admin: bool) -> Claims {
        Claims {
            sub: sub.into(),
            admin,
            ..Default::default()
        }
    }

    #[test]
    fn test_target_defaults_to_caller() {
        assert_eq!(target(&claims("u1", false), None).unwrap(), "u1");
        assert_eq!(target(&claims("u1", false), Some("u1".into())).unwrap(), "u1");
    }

    #[test]
    fn test_only_admin_targets_others() {
        assert!(matches!(
            target(&claims("u1", false), Some("u2".into())),
            Err(Error::Forbidden)
        ));
        assert_eq!(target(&claims("root", true), Some("u2".into())).unwrap(), "u2");
    }

    #[test]
    fn test_writes_act_as_caller() {
        assert_eq!(caller(&claims("u1", false), None).unwrap(), "u1");
        assert_eq!(caller(&claims("u1", false), Some("u1".into())).unwrap(), "u1");
        assert!(matches!(
            caller(&claims("root", true), Some("u2".into())),
            Err(Error::Forbidden)
        ));
    }
}
