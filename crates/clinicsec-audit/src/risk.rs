//! Risk classification
//!
//! Maps an event type plus call context to a risk tier via fixed tables.

use crate::event::AuditEventType::{self, *};
use crate::event::RiskLevel;

/// Events that are critical regardless of outcome.
const CRITICAL_EVENTS: &[AuditEventType] = &[
    SecurityViolation,
    SystemConfigChanged,
    PermissionChanged,
    PatientDeleted,
    DataExport,
];

const HIGH_RISK_EVENTS: &[AuditEventType] = &[
    LoginFailed,
    AccessDenied,
    MfaFailed,
    PasswordChanged,
    RoleAssigned,
    PatientCreated,
    MedicalRecordCreated,
    PrescriptionCreated,
    PaymentProcessed,
];

const MEDIUM_RISK_EVENTS: &[AuditEventType] = &[
    PatientViewed,
    MedicalRecordViewed,
    BillingViewed,
    PatientUpdated,
    MedicalRecordUpdated,
    ApiAccess,
];

/// Classify an event into a risk tier.
///
/// Table membership decides the base tier (absent types are `Low`). A failed
/// event is raised to at least `High`; an event carrying an error message is
/// raised to at least `Medium`.
pub fn classify(event_type: AuditEventType, success: bool, has_error: bool) -> RiskLevel {
    let base = if CRITICAL_EVENTS.contains(&event_type) {
        RiskLevel::Critical
    } else if HIGH_RISK_EVENTS.contains(&event_type) {
        RiskLevel::High
    } else if MEDIUM_RISK_EVENTS.contains(&event_type) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    if !success {
        base.max(RiskLevel::High)
    } else if has_error {
        base.max(RiskLevel::Medium)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_table_wins_regardless_of_outcome() {
        assert_eq!(classify(DataExport, true, false), RiskLevel::Critical);
        assert_eq!(classify(DataExport, false, true), RiskLevel::Critical);
        assert_eq!(classify(SystemConfigChanged, true, false), RiskLevel::Critical);
    }

    #[test]
    fn high_table_unchanged_by_success_flag() {
        assert_eq!(classify(LoginFailed, true, false), RiskLevel::High);
        assert_eq!(classify(LoginFailed, false, false), RiskLevel::High);
    }

    #[test]
    fn failure_raises_to_at_least_high() {
        // Medium-table event
        assert_eq!(classify(PatientViewed, false, false), RiskLevel::High);
        // Untabled event
        assert_eq!(classify(UserLogout, false, false), RiskLevel::High);
    }

    #[test]
    fn error_message_raises_to_at_least_medium() {
        assert_eq!(classify(UserLogin, true, true), RiskLevel::Medium);
        // Does not demote higher tiers
        assert_eq!(classify(PaymentProcessed, true, true), RiskLevel::High);
    }

    #[test]
    fn untabled_successful_events_are_low() {
        assert_eq!(classify(UserLogin, true, false), RiskLevel::Low);
        assert_eq!(classify(DatabaseBackup, true, false), RiskLevel::Low);
    }
}
