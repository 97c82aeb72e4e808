//! Error handler for adearn.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Error as SQLxError, postgres::PgDatabaseError};
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, Error>;

/// Business rule violations. Nothing was written when one of these is
/// returned.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("amount must be a positive number")]
    NonPositiveAmount,

    #[error("minimum withdrawal amount is {minimum}")]
    BelowMinimum { minimum: Decimal },

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("payment details must not be empty")]
    EmptyDetails,

    #[error("submission proof must not be empty")]
    EmptyProof,

    #[error("a rejection reason is required")]
    EmptyReason,

    #[error("daily limit of {limit} ads reached, come back tomorrow")]
    QuotaExhausted { limit: u32 },

    #[error("ad must stay on screen {remaining_secs} more second(s)")]
    DwellNotElapsed { remaining_secs: u64 },

    #[error("ad option cannot change once an ad was viewed today")]
    OptionLocked,

    #[error("ad is not available for this ad option")]
    AdUnavailable,

    #[error("task is not available")]
    TaskUnavailable,

    #[error("a submission for this task is already waiting for review")]
    SubmissionPending,

    #[error("{entity} was already {status}")]
    AlreadyProcessed { entity: &'static str, status: String },

    #[error("view identifier was already used by another request")]
    ViewKeyReused,

    #[error("no ad is ready to be credited")]
    NotReady,

    /// A concurrent request changed the state this one relied on.
    #[error("{0}")]
    Conflict(String),

    #[error("invalid platform settings: {0}")]
    InvalidSettings(&'static str),

    #[error("malformed transaction: {0}")]
    MalformedTransaction(&'static str),

    #[error("validation error occurred")]
    Fields(#[from] ValidationErrors),
}

impl ValidationError {
    /// Stable identifier written as the problem `type`.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::NonPositiveAmount => "non-positive-amount",
            ValidationError::BelowMinimum { .. } => "below-minimum",
            ValidationError::InsufficientBalance { .. } => "insufficient-balance",
            ValidationError::EmptyDetails => "empty-details",
            ValidationError::EmptyProof => "empty-proof",
            ValidationError::EmptyReason => "empty-reason",
            ValidationError::QuotaExhausted { .. } => "quota-exhausted",
            ValidationError::DwellNotElapsed { .. } => "dwell-not-elapsed",
            ValidationError::OptionLocked => "option-locked",
            ValidationError::AdUnavailable => "ad-unavailable",
            ValidationError::TaskUnavailable => "task-unavailable",
            ValidationError::SubmissionPending => "submission-pending",
            ValidationError::AlreadyProcessed { .. } => "already-processed",
            ValidationError::ViewKeyReused => "view-key-reused",
            ValidationError::NotReady => "not-ready",
            ValidationError::Conflict(_) => "conflict",
            ValidationError::InvalidSettings(_) => "invalid-settings",
            ValidationError::MalformedTransaction(_) => "malformed-transaction",
            ValidationError::Fields(_) => "invalid-fields",
        }
    }
}

/// Errors returned by every engine operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("account is blocked")]
    Blocked,

    #[error("missing or invalid 'Authorization' header")]
    Unauthorized,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    Conflict(String),

    #[error("request failed with status {status}")]
    Collaborator { status: u16, reason: Option<String> },

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("internal server error, {details}")]
    Internal { details: String },
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(ValidationError::Fields(errors))
    }
}

impl From<crate::model::UnknownVariant> for Error {
    fn from(err: crate::model::UnknownVariant) -> Self {
        Error::internal(format!("corrupted record: {err}"))
    }
}

impl Error {
    pub fn internal(details: impl Into<String>) -> Self {
        Error::Internal {
            details: details.into(),
        }
    }

    pub fn not_found(entity: &'static str) -> Self {
        Error::NotFound { entity }
    }

    /// Message fit for an end user.
    /// Collaborator failures surface the reason the server gave.
    pub fn user_message(&self) -> String {
        match self {
            Error::Collaborator {
                reason: Some(reason),
                ..
            } => reason.clone(),
            err => err.to_string(),
        }
    }

    /// Typed error for a problem body, when its `type` is one a caller
    /// must react to. `limit` is the extension member of quota refusals.
    pub fn from_problem(kind: &str, limit: Option<u32>) -> Option<Self> {
        let err = match kind {
            "blocked" => return Some(Error::Blocked),
            "quota-exhausted" => ValidationError::QuotaExhausted { limit: limit? },
            "option-locked" => ValidationError::OptionLocked,
            "ad-unavailable" => ValidationError::AdUnavailable,
            "task-unavailable" => ValidationError::TaskUnavailable,
            "submission-pending" => ValidationError::SubmissionPending,
            "view-key-reused" => ValidationError::ViewKeyReused,
            "non-positive-amount" => ValidationError::NonPositiveAmount,
            "empty-details" => ValidationError::EmptyDetails,
            "empty-proof" => ValidationError::EmptyProof,
            "empty-reason" => ValidationError::EmptyReason,
            _ => return None,
        };
        Some(err.into())
    }

    /// HTTP status carried by this error on the wire.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::Axum(_) => StatusCode::BAD_REQUEST,
            Error::Blocked | Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Unauthorized | Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Collaborator { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `type` field.
    pub fn kind(mut self, kind: &str) -> Self {
        self.r#type = Some(kind.into());
        self
    }

    /// Daily limit a quota refusal was checked against.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
            limit: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|message| message.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .details(&self.to_string())
            .status(self.status_code());

        let response = match &self {
            Error::Validation(ValidationError::Fields(errors)) => response
                .kind("invalid-fields")
                .title("There were validation errors with your request.")
                .errors(errors),
            Error::Validation(ValidationError::QuotaExhausted { limit }) => response
                .kind("quota-exhausted")
                .title("Request rejected by a business rule.")
                .limit(*limit),
            Error::Validation(err) => response
                .kind(err.code())
                .title("Request rejected by a business rule."),
            Error::Axum(_) => response.title("Request rejected by a business rule."),
            Error::Blocked => response.kind("blocked").title("Account is blocked."),
            Error::Unauthorized | Error::Token(_) => {
                response.title("Missing or invalid 'Authorization' header.")
            },
            Error::Forbidden => response.title("Insufficient permissions."),
            Error::NotFound { .. } => response.title("Resource not found."),
            Error::Conflict(_) => response.title("Conflicting request in progress."),
            Error::Collaborator { reason, .. } => response
                .title("Upstream request failed.")
                .details(reason.as_deref().unwrap_or_default()),
            Error::Sql(err) => {
                tracing::error!(
                    error = %err,
                    detail = err
                        .as_database_error()
                        .and_then(|e| e.try_downcast_ref::<PgDatabaseError>())
                        .and_then(|e| e.detail()),
                    "database request failed"
                );
                ResponseError::default()
            },
            err => {
                tracing::error!(error = %err, "server returned 500 status");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::from(ValidationError::EmptyDetails).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::Blocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::Conflict("busy".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::not_found("withdrawal").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_collaborator_message_prefers_reason() {
        let err = Error::Collaborator {
            status: 400,
            reason: Some("Insufficient balance.".into()),
        };
        assert_eq!(err.user_message(), "Insufficient balance.");

        let err = Error::Collaborator {
            status: 502,
            reason: None,
        };
        assert_eq!(err.user_message(), "request failed with status 502");
    }

    #[tokio::test]
    async fn test_problem_carries_type_and_limit() {
        use http_body_util::BodyExt;

        let response = Error::from(ValidationError::QuotaExhausted { limit: 50 }).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["type"], "quota-exhausted");
        assert_eq!(body["limit"], 50);

        assert!(matches!(
            Error::from_problem("quota-exhausted", Some(50)),
            Some(Error::Validation(ValidationError::QuotaExhausted { limit: 50 }))
        ));
        assert!(matches!(Error::from_problem("blocked", None), Some(Error::Blocked)));
        assert!(Error::from_problem("quota-exhausted", None).is_none());
        assert!(Error::from_problem("insufficient-balance", None).is_none());
    }
}
