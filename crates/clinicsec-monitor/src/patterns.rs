//! Threat pattern table
//!
//! Fixed, data-driven detection rules: each pattern names a sliding window, a
//! relevant event-type set, and a trigger condition, and one generic evaluator
//! runs them all against recent audit entries.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use clinicsec_audit::{AuditEventType, AuditLogEntry, RiskLevel};

/// A fixed detection rule. Patterns are configured at startup and never
/// mutated at runtime.
pub struct ThreatPattern {
    pub name: &'static str,
    pub description: &'static str,
    pub severity: RiskLevel,
    pub window: Duration,
    pub event_types: &'static [AuditEventType],
    /// Only entries at or above this tier are relevant when set.
    pub min_risk: Option<RiskLevel>,
    pub trigger: Trigger,
    pub alert_message: &'static str,
}

/// Trigger condition evaluated over the windowed relevant entries.
pub enum Trigger {
    /// Any single origin address accounts for at least `min` entries.
    PerOriginCount { min: usize },
    /// Any single actor accounts for at least `min` entries.
    PerActorCount { min: usize },
    /// Any single actor touched more than `min_exclusive` distinct resources.
    PerActorDistinctResources { min_exclusive: usize },
    /// The window holds at least `min` entries in total.
    TotalCount { min: usize },
    /// Any single actor produced `min_events` entries of `count_type` from at
    /// least `min_origins` distinct addresses.
    PerActorOriginSpread {
        count_type: AuditEventType,
        min_origins: usize,
        min_events: usize,
    },
    /// Any entry's payload `record_count` exceeds `min_records_exclusive`, or
    /// any single actor has at least `min_per_actor` entries.
    ExportAnomaly {
        min_records_exclusive: u64,
        min_per_actor: usize,
    },
    /// At least one relevant entry.
    Any,
}

/// The seven detection rules shipped with the monitor.
pub fn default_patterns() -> Vec<ThreatPattern> {
    vec![
        ThreatPattern {
            name: "bruteforce_login",
            description: "Multiple failed login attempts from the same address",
            severity: RiskLevel::High,
            window: Duration::minutes(15),
            event_types: &[AuditEventType::LoginFailed],
            min_risk: None,
            trigger: Trigger::PerOriginCount { min: 5 },
            alert_message: "Potential brute force attack detected",
        },
        ThreatPattern {
            name: "privilege_escalation",
            description: "Repeated access denials for high-privilege resources",
            severity: RiskLevel::Critical,
            window: Duration::minutes(10),
            event_types: &[AuditEventType::AccessDenied],
            min_risk: Some(RiskLevel::High),
            trigger: Trigger::PerActorCount { min: 3 },
            alert_message: "Potential privilege escalation attempt detected",
        },
        ThreatPattern {
            name: "unusual_data_access",
            description: "Abnormal volume of patient data access",
            severity: RiskLevel::Medium,
            window: Duration::minutes(60),
            event_types: &[
                AuditEventType::PatientViewed,
                AuditEventType::MedicalRecordViewed,
            ],
            min_risk: None,
            trigger: Trigger::PerActorDistinctResources { min_exclusive: 20 },
            alert_message: "Unusual patient data access pattern detected",
        },
        ThreatPattern {
            name: "mfa_attacks",
            description: "Multiple MFA failures indicating account compromise",
            severity: RiskLevel::High,
            window: Duration::minutes(30),
            event_types: &[AuditEventType::MfaFailed],
            min_risk: None,
            trigger: Trigger::TotalCount { min: 5 },
            alert_message: "Multiple MFA failure attempts detected",
        },
        ThreatPattern {
            name: "session_anomaly",
            description: "Suspicious session activity across addresses",
            severity: RiskLevel::Medium,
            window: Duration::minutes(120),
            event_types: &[AuditEventType::UserLogin, AuditEventType::UserLogout],
            min_risk: None,
            trigger: Trigger::PerActorOriginSpread {
                count_type: AuditEventType::UserLogin,
                min_origins: 3,
                min_events: 3,
            },
            alert_message: "Potential session hijacking or account sharing detected",
        },
        ThreatPattern {
            name: "suspicious_export",
            description: "Large or frequent data exports",
            severity: RiskLevel::Critical,
            window: Duration::hours(24),
            event_types: &[AuditEventType::DataExport],
            min_risk: None,
            trigger: Trigger::ExportAnomaly {
                min_records_exclusive: 1_000,
                min_per_actor: 5,
            },
            alert_message: "Suspicious data export activity detected",
        },
        ThreatPattern {
            name: "config_changes",
            description: "Critical system configuration change",
            severity: RiskLevel::Critical,
            window: Duration::minutes(60),
            event_types: &[AuditEventType::SystemConfigChanged],
            min_risk: None,
            trigger: Trigger::Any,
            alert_message: "Critical system configuration change detected",
        },
    ]
}

/// Evaluate one pattern against recent entries.
///
/// Returns the windowed relevant entries when the trigger fires, `None`
/// otherwise.
pub fn evaluate<'a>(
    pattern: &ThreatPattern,
    entries: &'a [AuditLogEntry],
    now: DateTime<Utc>,
) -> Option<Vec<&'a AuditLogEntry>> {
    let window_start = now - pattern.window;
    let relevant: Vec<&AuditLogEntry> = entries
        .iter()
        .filter(|entry| {
            entry.timestamp > window_start
                && pattern.event_types.contains(&entry.event_type)
                && pattern.min_risk.map_or(true, |min| entry.risk_level >= min)
        })
        .collect();

    triggered(&pattern.trigger, &relevant).then_some(relevant)
}

fn triggered(trigger: &Trigger, relevant: &[&AuditLogEntry]) -> bool {
    match trigger {
        Trigger::PerOriginCount { min } => {
            count_by(relevant, origin_key).values().any(|n| n >= min)
        }
        Trigger::PerActorCount { min } => {
            count_by(relevant, actor_key).values().any(|n| n >= min)
        }
        Trigger::PerActorDistinctResources { min_exclusive } => {
            let mut per_actor: HashMap<String, HashSet<String>> = HashMap::new();
            for entry in relevant {
                if let Some(resource) = resource_key(entry) {
                    per_actor.entry(actor_key(entry)).or_default().insert(resource);
                }
            }
            per_actor.values().any(|set| set.len() > *min_exclusive)
        }
        Trigger::TotalCount { min } => relevant.len() >= *min,
        Trigger::PerActorOriginSpread {
            count_type,
            min_origins,
            min_events,
        } => {
            let mut per_actor: HashMap<String, (HashSet<String>, usize)> = HashMap::new();
            for entry in relevant.iter().filter(|e| e.event_type == *count_type) {
                let (origins, count) = per_actor.entry(actor_key(entry)).or_default();
                origins.insert(origin_key(entry));
                *count += 1;
            }
            per_actor
                .values()
                .any(|(origins, count)| origins.len() >= *min_origins && *count >= *min_events)
        }
        Trigger::ExportAnomaly {
            min_records_exclusive,
            min_per_actor,
        } => {
            let oversized = relevant.iter().any(|entry| {
                record_count(entry).map_or(false, |n| n > *min_records_exclusive)
            });
            oversized || count_by(relevant, actor_key).values().any(|n| n >= min_per_actor)
        }
        Trigger::Any => !relevant.is_empty(),
    }
}

fn count_by(
    relevant: &[&AuditLogEntry],
    key: fn(&AuditLogEntry) -> String,
) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for entry in relevant {
        *counts.entry(key(entry)).or_insert(0) += 1;
    }
    counts
}

fn actor_key(entry: &AuditLogEntry) -> String {
    entry
        .actor_id
        .clone()
        .unwrap_or_else(|| "anonymous".to_string())
}

fn origin_key(entry: &AuditLogEntry) -> String {
    entry
        .ip_address
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
}

fn resource_key(entry: &AuditLogEntry) -> Option<String> {
    entry.resource_id.clone().or_else(|| {
        entry
            .metadata
            .as_ref()
            .and_then(|m| m.get("patient_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    })
}

fn record_count(entry: &AuditLogEntry) -> Option<u64> {
    entry
        .payload
        .as_ref()
        .and_then(|p| p.get("record_count"))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(event_type: AuditEventType, age_minutes: i64) -> AuditLogEntry {
        AuditLogEntry {
            id: None,
            actor_id: Some("alice".to_string()),
            session_id: None,
            event_type,
            payload: None,
            resource_type: None,
            resource_id: None,
            ip_address: Some("10.0.0.5".to_string()),
            user_agent: None,
            risk_level: RiskLevel::High,
            success: false,
            error_message: None,
            timestamp: Utc::now() - Duration::minutes(age_minutes),
            metadata: None,
        }
    }

    fn pattern(name: &str) -> ThreatPattern {
        default_patterns()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
    }

    #[test]
    fn bruteforce_fires_on_five_failures_from_one_origin() {
        let entries: Vec<_> = (0..5)
            .map(|_| entry(AuditEventType::LoginFailed, 5))
            .collect();
        let matched = evaluate(&pattern("bruteforce_login"), &entries, Utc::now()).unwrap();
        assert_eq!(matched.len(), 5);
    }

    #[test]
    fn bruteforce_ignores_failures_outside_window() {
        let mut entries: Vec<_> = (0..4)
            .map(|_| entry(AuditEventType::LoginFailed, 5))
            .collect();
        entries.push(entry(AuditEventType::LoginFailed, 30));
        assert!(evaluate(&pattern("bruteforce_login"), &entries, Utc::now()).is_none());
    }

    #[test]
    fn bruteforce_needs_a_single_origin_over_threshold() {
        let entries: Vec<_> = (0..6)
            .map(|i| {
                let mut e = entry(AuditEventType::LoginFailed, 5);
                e.ip_address = Some(format!("10.0.0.{i}"));
                e
            })
            .collect();
        assert!(evaluate(&pattern("bruteforce_login"), &entries, Utc::now()).is_none());
    }

    #[test]
    fn privilege_escalation_requires_high_risk_denials() {
        let mut entries: Vec<_> = (0..3)
            .map(|_| entry(AuditEventType::AccessDenied, 5))
            .collect();
        assert!(evaluate(&pattern("privilege_escalation"), &entries, Utc::now()).is_some());

        for e in entries.iter_mut() {
            e.risk_level = RiskLevel::Medium;
        }
        assert!(evaluate(&pattern("privilege_escalation"), &entries, Utc::now()).is_none());
    }

    #[test]
    fn unusual_data_access_counts_distinct_resources_per_actor() {
        let entries: Vec<_> = (0..21)
            .map(|i| {
                let mut e = entry(AuditEventType::PatientViewed, 10);
                e.resource_id = Some(format!("pat-{i}"));
                e
            })
            .collect();
        assert!(evaluate(&pattern("unusual_data_access"), &entries, Utc::now()).is_some());

        // Same resource over and over is not a spread.
        let repeats: Vec<_> = (0..30)
            .map(|_| {
                let mut e = entry(AuditEventType::PatientViewed, 10);
                e.resource_id = Some("pat-1".to_string());
                e
            })
            .collect();
        assert!(evaluate(&pattern("unusual_data_access"), &repeats, Utc::now()).is_none());
    }

    #[test]
    fn unusual_data_access_falls_back_to_patient_metadata() {
        let entries: Vec<_> = (0..21)
            .map(|i| {
                let mut e = entry(AuditEventType::MedicalRecordViewed, 10);
                e.metadata = Some(json!({ "patient_id": format!("pat-{i}") }));
                e
            })
            .collect();
        assert!(evaluate(&pattern("unusual_data_access"), &entries, Utc::now()).is_some());
    }

    #[test]
    fn mfa_attacks_counts_total_failures() {
        let entries: Vec<_> = (0..5)
            .map(|i| {
                let mut e = entry(AuditEventType::MfaFailed, 5);
                e.actor_id = Some(format!("user-{i}"));
                e
            })
            .collect();
        assert!(evaluate(&pattern("mfa_attacks"), &entries, Utc::now()).is_some());
        assert!(evaluate(&pattern("mfa_attacks"), &entries[..4], Utc::now()).is_none());
    }

    #[test]
    fn session_anomaly_needs_origin_spread() {
        let entries: Vec<_> = (0..3)
            .map(|i| {
                let mut e = entry(AuditEventType::UserLogin, 30);
                e.ip_address = Some(format!("198.51.100.{i}"));
                e
            })
            .collect();
        assert!(evaluate(&pattern("session_anomaly"), &entries, Utc::now()).is_some());

        // Three logins from one address is unremarkable.
        let same_ip: Vec<_> = (0..3)
            .map(|_| entry(AuditEventType::UserLogin, 30))
            .collect();
        assert!(evaluate(&pattern("session_anomaly"), &same_ip, Utc::now()).is_none());
    }

    #[test]
    fn suspicious_export_fires_on_large_record_count() {
        let mut e = entry(AuditEventType::DataExport, 60);
        e.payload = Some(json!({"record_count": 1_500}));
        let entries = [e];
        let matched = evaluate(&pattern("suspicious_export"), &entries, Utc::now()).unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn suspicious_export_fires_on_frequent_exports() {
        let entries: Vec<_> = (0..5)
            .map(|_| {
                let mut e = entry(AuditEventType::DataExport, 60);
                e.payload = Some(json!({"record_count": 10}));
                e
            })
            .collect();
        assert!(evaluate(&pattern("suspicious_export"), &entries, Utc::now()).is_some());
    }

    #[test]
    fn config_changes_fires_on_any_occurrence() {
        let e = entry(AuditEventType::SystemConfigChanged, 10);
        assert!(evaluate(&pattern("config_changes"), &[e], Utc::now()).is_some());

        let stale = entry(AuditEventType::SystemConfigChanged, 90);
        assert!(evaluate(&pattern("config_changes"), &[stale], Utc::now()).is_none());
    }
}
