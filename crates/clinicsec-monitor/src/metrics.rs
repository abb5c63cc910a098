//! Rolling security metrics
//!
//! Hourly snapshots over the last day of audit activity, keyed by
//! `year-month-day-hour` and pruned past 24 hours.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use clinicsec_audit::{AuditEventType, AuditLogEntry, RiskLevel};

const RETENTION_HOURS: i64 = 24;

/// Point-in-time counters for one hour of activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub timestamp: DateTime<Utc>,
    pub failed_logins: u64,
    pub successful_logins: u64,
    pub mfa_failures: u64,
    pub access_denials: u64,
    pub critical_events: u64,
    pub active_sessions: u64,
    /// High-risk failures.
    pub suspicious_activity: u64,
    pub data_access: u64,
    pub system_errors: u64,
}

impl SecurityMetrics {
    /// Compute a snapshot from the entries of the last hour.
    pub fn compute(entries: &[AuditLogEntry], active_sessions: u64, now: DateTime<Utc>) -> Self {
        let count = |predicate: &dyn Fn(&AuditLogEntry) -> bool| {
            entries.iter().filter(|e| predicate(e)).count() as u64
        };
        Self {
            timestamp: now,
            failed_logins: count(&|e| e.event_type == AuditEventType::LoginFailed),
            successful_logins: count(&|e| e.event_type == AuditEventType::UserLogin),
            mfa_failures: count(&|e| e.event_type == AuditEventType::MfaFailed),
            access_denials: count(&|e| e.event_type == AuditEventType::AccessDenied),
            critical_events: count(&|e| e.risk_level == RiskLevel::Critical),
            active_sessions,
            suspicious_activity: count(&|e| !e.success && e.risk_level == RiskLevel::High),
            data_access: count(&|e| {
                matches!(
                    e.event_type,
                    AuditEventType::PatientViewed | AuditEventType::MedicalRecordViewed
                )
            }),
            system_errors: count(&|e| e.event_type == AuditEventType::SystemError),
        }
    }
}

/// Hourly snapshot store with 24-hour retention.
#[derive(Default)]
pub struct MetricsStore {
    hourly: DashMap<String, SecurityMetrics>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot under its hour key and prune expired hours.
    pub fn record(&self, metrics: SecurityMetrics) {
        let now = metrics.timestamp;
        self.hourly.insert(hour_key(now), metrics);

        let cutoff = now - Duration::hours(RETENTION_HOURS);
        self.hourly.retain(|_, m| m.timestamp >= cutoff);
    }

    /// Latest snapshot, if any hour has been recorded.
    pub fn latest(&self) -> Option<SecurityMetrics> {
        self.hourly
            .iter()
            .max_by_key(|m| m.timestamp)
            .map(|m| m.clone())
    }

    /// Snapshots of the last `hours`, oldest first.
    pub fn history(&self, hours: i64) -> Vec<SecurityMetrics> {
        let cutoff = Utc::now() - Duration::hours(hours);
        let mut history: Vec<SecurityMetrics> = self
            .hourly
            .iter()
            .filter(|m| m.timestamp >= cutoff)
            .map(|m| m.clone())
            .collect();
        history.sort_by_key(|m| m.timestamp);
        history
    }
}

fn hour_key(t: DateTime<Utc>) -> String {
    format!("{}-{:02}-{:02}-{:02}", t.year(), t.month(), t.day(), t.hour())
}
