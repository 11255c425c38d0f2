//! Error types for the trust core.

use thiserror::Error;

/// Result type alias for trust-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy surfaced by the trust core.
///
/// Every variant maps onto a stable machine-readable kind (see
/// [`CoreError::kind`]) so transport layers can translate errors without
/// matching on display strings. Scoring and cache failures are recovered
/// internally and never surface through this type.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    // ═══════════════════════════════════════════════════════════
    // Request Validation
    // ═══════════════════════════════════════════════════════════

    /// A required field was absent from the request.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field was present but carried an unusable value.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Identity & Access
    // ═══════════════════════════════════════════════════════════

    /// No verifiable principal could be resolved for a call that needs one.
    #[error("Authentication required")]
    Unauthenticated,

    /// The resolved principal's role does not grant the required permission.
    #[error("Insufficient permissions: {required}")]
    ForbiddenRole {
        /// Permission that was missing.
        required: String,
    },

    /// The principal or device behind the request is quarantined.
    #[error("Source is quarantined")]
    Quarantined {
        /// When the quarantine lifts, if a deadline is set.
        until: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// The admin account is locked out after repeated failed logins.
    #[error("Account is locked")]
    AccountLocked {
        /// When the lock expires.
        until: chrono::DateTime<chrono::Utc>,
    },

    // ═══════════════════════════════════════════════════════════
    // Throttling
    // ═══════════════════════════════════════════════════════════

    /// The source exceeded its submission budget for the current window.
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Community Validation
    // ═══════════════════════════════════════════════════════════

    /// The device already validated this report.
    #[error("Report already validated by this device")]
    DuplicateValidation,

    /// The submitter attempted to validate their own report.
    #[error("Cannot validate your own report")]
    SelfValidation,

    // ═══════════════════════════════════════════════════════════
    // Persistence
    // ═══════════════════════════════════════════════════════════

    /// The addressed entity does not exist.
    #[error("Resource not found")]
    NotFound,

    /// The write observed a stale revision and lost the optimistic race.
    #[error("Stale write rejected: {entity} revision moved")]
    Conflict {
        /// Entity whose revision moved underneath the writer.
        entity: &'static str,
    },

    /// A moderation write violated a state-machine invariant.
    ///
    /// Moderation failures are loud by design and always name the
    /// violated invariant.
    #[error("Invalid transition: {invariant}")]
    InvalidTransition {
        /// The invariant the write would have broken.
        invariant: String,
    },

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════

    /// Document store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Payload could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal failure that must not leak detail to callers.
    #[error("Internal error")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable error kind.
    ///
    /// Transport layers key status codes and client handling off this
    /// value; it never changes for a given variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::InvalidValue { .. } => "invalid_value",
            Self::Unauthenticated => "unauthenticated",
            Self::ForbiddenRole { .. } => "forbidden_role",
            Self::Quarantined { .. } => "quarantined",
            Self::AccountLocked { .. } => "account_locked",
            Self::RateLimited { .. } => "rate_limited",
            Self::DuplicateValidation => "duplicate_validation",
            Self::SelfValidation => "self_validation",
            Self::NotFound => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::InvalidTransition { .. } => "invalid_value",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if this error is due to invalid caller input.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::InvalidValue { .. }
                | Self::DuplicateValidation
                | Self::SelfValidation
                | Self::InvalidTransition { .. }
        )
    }

    /// Returns `true` if this error indicates an abuse-control action.
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::Quarantined { .. } | Self::AccountLocked { .. } | Self::RateLimited { .. }
        )
    }

    /// Returns `true` if the failure detail must never reach callers.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(CoreError::Unauthenticated.kind(), "unauthenticated");
        assert_eq!(
            CoreError::Conflict { entity: "report" }.kind(),
            "conflict"
        );
        assert_eq!(CoreError::Database("boom".into()).kind(), "internal");
        assert_eq!(CoreError::DuplicateValidation.kind(), "duplicate_validation");
    }

    #[test]
    fn internal_errors_are_flagged() {
        assert!(CoreError::Internal("x".into()).is_internal());
        assert!(!CoreError::NotFound.is_internal());
    }

    #[test]
    fn security_predicates() {
        assert!(CoreError::Quarantined { until: None }.is_security_issue());
        assert!(!CoreError::NotFound.is_security_issue());
        assert!(CoreError::SelfValidation.is_user_error());
    }
}
