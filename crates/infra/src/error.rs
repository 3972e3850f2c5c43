use thiserror::Error;

use rolegate_auth::{CredentialError, ReasonCode, ResetStatus, TransitionError};
use rolegate_core::DomainError;

use crate::delivery::DeliveryError;
use crate::store::StoreError;

/// Error returned by every service operation.
///
/// Messages never carry credential material or data of accounts other than
/// the one addressed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("access denied: {}", .0.message())]
    Denied(ReasonCode),

    #[error("INVALID_STATE_TRANSITION: {from} -> {to}")]
    InvalidStateTransition { from: ResetStatus, to: ResetStatus },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ServiceError {
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            ServiceError::Denied(code) => Some(*code),
            _ => None,
        }
    }

    /// Transient storage failures and an unreachable delivery channel are
    /// worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Storage(e) => e.is_transient(),
            ServiceError::Delivery(DeliveryError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

impl From<TransitionError> for ServiceError {
    fn from(err: TransitionError) -> Self {
        ServiceError::InvalidStateTransition {
            from: err.from,
            to: err.to,
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Conflict(msg) => ServiceError::Conflict(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ServiceError::Validation(msg),
            other @ DomainError::InvariantViolation(_) => ServiceError::Validation(other.to_string()),
        }
    }
}

impl From<CredentialError> for ServiceError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Blank => ServiceError::Validation(err.to_string()),
            other => ServiceError::Credential(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ServiceError::Storage(StoreError::Timeout("t".into())).is_retryable());
        assert!(!ServiceError::Storage(StoreError::Corrupt("c".into())).is_retryable());
        assert!(!ServiceError::Denied(ReasonCode::AccountForbidden).is_retryable());
        assert!(!ServiceError::NotFound("account").is_retryable());
        assert!(ServiceError::Delivery(DeliveryError::Unavailable("smtp".into())).is_retryable());
        assert!(!ServiceError::Delivery(DeliveryError::NotStaged(rolegate_core::ResetRequestId::new())).is_retryable());
    }

    #[test]
    fn transition_errors_keep_both_states() {
        let err: ServiceError = TransitionError {
            from: ResetStatus::Requested,
            to: ResetStatus::PasswordSent,
        }
        .into();
        assert_eq!(err.to_string(), "INVALID_STATE_TRANSITION: REQUESTED -> PASSWORD_SENT");
    }

    #[test]
    fn denial_message_is_the_user_facing_text() {
        let err = ServiceError::Denied(ReasonCode::SelfModificationForbidden);
        assert_eq!(err.reason_code(), Some(ReasonCode::SelfModificationForbidden));
        assert!(err.to_string().starts_with("access denied: "));
    }
}
