use thiserror::Error;
use uuid::Uuid;
use axum::http::StatusCode;

use crate::{
    db::store::{StoreError, Table},
    error::{ErrorMessage, HttpError},
    models::lifecyclemodel::Role,
};

/// A user-facing refusal. Returned as a value and never logged as a fault;
/// the caller performs no writes when it gets one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("Cannot {action} a {entity} that is {from}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("Quote {quote_id} has already been accepted for request {request_id}")]
    AlreadyAccepted { request_id: Uuid, quote_id: Uuid },

    #[error("Contract {existing_contract_id} already covers this request")]
    ConflictingContract { existing_contract_id: Uuid },

    #[error("Contract {existing_contract_id} is already under way for this job; review it instead")]
    ActiveContractExists { existing_contract_id: Uuid },

    #[error("At least one completion photo is required to mark the job complete")]
    ProofRequired,

    #[error("Contract changed to version {current} while signing version {submitted}")]
    StaleSignatureVersion { submitted: i32, current: i32 },

    #[error("{table} {id} not found")]
    NotFound { table: Table, id: Uuid },

    #[error("User {actor_id} is not a party to this job")]
    Forbidden { actor_id: Uuid },

    /// A party to the job tried an action that belongs to the other side.
    #[error("Only the {expected} can {action} this {entity}")]
    WrongRole {
        expected: Role,
        action: &'static str,
        entity: &'static str,
    },

    #[error("{0}")]
    Validation(String),
}

impl Rejection {
    pub fn not_found(table: Table, id: Uuid) -> Self {
        Rejection::NotFound { table, id }
    }

    pub fn invalid(entity: &'static str, from: impl ToString, action: &'static str) -> Self {
        Rejection::InvalidTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn wrong_role(expected: Role, action: &'static str, entity: &'static str) -> Self {
        Rejection::WrongRole {
            expected,
            action,
            entity,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Rejection::InvalidTransition { .. } => "invalid_transition",
            Rejection::AlreadyAccepted { .. } => "already_accepted",
            Rejection::ConflictingContract { .. } => "conflicting_contract",
            Rejection::ActiveContractExists { .. } => "active_contract_exists",
            Rejection::ProofRequired => "proof_required",
            Rejection::StaleSignatureVersion { .. } => "stale_signature_version",
            Rejection::NotFound { .. } => "not_found",
            Rejection::Forbidden { .. } => "forbidden",
            Rejection::WrongRole { .. } => "wrong_role",
            Rejection::Validation(_) => "validation",
        }
    }

    /// The record the user should be routed to instead of a dead end.
    pub fn conflict_id(&self) -> Option<Uuid> {
        match self {
            Rejection::AlreadyAccepted { quote_id, .. } => Some(*quote_id),
            Rejection::ConflictingContract { existing_contract_id }
            | Rejection::ActiveContractExists { existing_contract_id } => Some(*existing_contract_id),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Rejection::NotFound { .. } => StatusCode::NOT_FOUND,
            Rejection::Forbidden { .. } | Rejection::WrongRole { .. } => StatusCode::FORBIDDEN,
            Rejection::AlreadyAccepted { .. }
            | Rejection::ConflictingContract { .. }
            | Rejection::ActiveContractExists { .. }
            | Rejection::StaleSignatureVersion { .. } => StatusCode::CONFLICT,
            Rejection::InvalidTransition { .. } | Rejection::ProofRequired => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Rejection::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Notification error: {0}")]
    Notification(String),
}

impl ServiceError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ServiceError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Rejected(rejection) => rejection.status_code(),
            ServiceError::Storage(StoreError::Conflict(_) | StoreError::Retry) => StatusCode::CONFLICT,
            ServiceError::Storage(_) | ServiceError::Notification(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Rejected(rejection) => {
                HttpError::new(rejection.to_string(), rejection.status_code())
                    .with_code(rejection.code())
                    .with_conflict(rejection.conflict_id())
            }
            ServiceError::Storage(StoreError::Conflict(table)) => {
                tracing::warn!("Write lost a race on {}", table);
                HttpError::conflict("This job was updated by someone else. Refresh and try again")
                    .with_code("conflict")
            }
            ServiceError::Storage(StoreError::Retry) => {
                tracing::warn!("Serialization failure, asking client to retry");
                HttpError::conflict("This job was updated by someone else. Refresh and try again")
                    .with_code("conflict")
            }
            other => {
                // Storage detail stays in the logs.
                tracing::error!("Lifecycle operation failed: {}", other);
                HttpError::server_error(ErrorMessage::ServerError.to_string())
            }
        }
    }
}
