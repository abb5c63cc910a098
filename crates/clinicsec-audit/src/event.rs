//! Audit event vocabulary and log entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of auditable event types, grouped by domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Authentication
    UserLogin,
    UserLogout,
    LoginFailed,
    PasswordChanged,
    MfaEnabled,
    MfaDisabled,
    MfaSuccess,
    MfaFailed,

    // Authorization
    AccessGranted,
    AccessDenied,
    PermissionChanged,
    RoleAssigned,
    RoleRemoved,

    // Data
    PatientCreated,
    PatientUpdated,
    PatientDeleted,
    PatientViewed,
    MedicalRecordCreated,
    MedicalRecordUpdated,
    MedicalRecordViewed,
    PrescriptionCreated,
    PrescriptionDispensed,

    // Financial
    InvoiceCreated,
    PaymentProcessed,
    RefundProcessed,
    BillingViewed,

    // System
    SystemConfigChanged,
    DatabaseBackup,
    SystemError,
    SecurityViolation,
    RateLimitExceeded,

    // API
    ApiAccess,
    ApiError,
    DataExport,
    DataImport,
}

/// Risk tier of an audit entry. A property of the pipeline, not of the
/// underlying business event's importance.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable audit log record.
///
/// `risk_level` is always computed by [`crate::risk::classify`], never set by
/// callers. `payload` is stored post-sanitization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Store-assigned identity, absent until persisted.
    pub id: Option<String>,
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub event_type: AuditEventType,
    pub payload: Option<serde_json::Value>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub risk_level: RiskLevel,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

/// Optional context supplied with a [`crate::AuditLogger::log`] call.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub payload: Option<serde_json::Value>,
    /// Defaults to success when unset.
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl EventContext {
    pub fn actor(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            ..Self::default()
        }
    }

    pub fn failed(error_message: impl Into<String>) -> Self {
        Self {
            success: Some(false),
            error_message: Some(error_message.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn event_types_serialize_snake_case() {
        let json = serde_json::to_string(&AuditEventType::MedicalRecordViewed).unwrap();
        assert_eq!(json, "\"medical_record_viewed\"");
        let back: AuditEventType = serde_json::from_str("\"login_failed\"").unwrap();
        assert_eq!(back, AuditEventType::LoginFailed);
    }
}
