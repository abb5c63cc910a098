//! Real-time security monitoring for the clinic platform
//!
//! Periodically pulls recent audit entries (store plus in-flight alert
//! buffer), evaluates a fixed threat-pattern table, and turns matches into
//! deduplicated, escalating incidents and rolling health metrics:
//! - Pattern table and generic windowed evaluator
//! - Incident lifecycle with one-hour dedup and auto-escalation
//! - Hourly metrics snapshots and a 0-100 health score
//!
//! Detection runs on a timer and immediately on critical audit alerts; a
//! tick-in-progress guard keeps a slow analysis run from overlapping the next.

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use clinicsec_audit::{
    AuditEventType, AuditLogEntry, AuditLogger, EventContext, QueryFilter, RiskLevel,
};

pub mod incidents;
pub mod metrics;
pub mod patterns;

pub use incidents::{IncidentManager, IncidentStatus, MatchOutcome, SecurityIncident};
pub use metrics::{MetricsStore, SecurityMetrics};
pub use patterns::{default_patterns, ThreatPattern, Trigger};

/// Patterns named in the security summary's top-threat list.
const TOP_THREATS: usize = 5;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub analysis_interval: std::time::Duration,
    /// How far back the detection query reaches.
    pub lookback_hours: i64,
    /// Cap on entries pulled per detection query.
    pub query_limit: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            analysis_interval: std::time::Duration::from_secs(60),
            lookback_hours: 4,
            query_limit: 1_000,
        }
    }
}

type IncidentCallback = Arc<dyn Fn(&SecurityIncident) + Send + Sync>;
type SessionCounter = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Aggregated security posture for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SecuritySummary {
    pub health_score: u32,
    pub active_incidents: usize,
    pub critical_incidents: usize,
    /// Critical events plus suspicious activity from the latest snapshot.
    pub recent_alerts: u64,
    pub metrics: Option<SecurityMetrics>,
    pub top_threats: Vec<String>,
}

/// Threat detector, incident manager, and metrics aggregator in one service.
///
/// Owns the incident and metrics maps exclusively; external readers only ever
/// see cloned snapshots.
pub struct SecurityMonitor {
    logger: Arc<AuditLogger>,
    config: MonitorConfig,
    patterns: Vec<ThreatPattern>,
    incidents: IncidentManager,
    metrics: MetricsStore,
    incident_callbacks: RwLock<Vec<IncidentCallback>>,
    session_counter: RwLock<Option<SessionCounter>>,
    /// Alert entries received since the last analysis run.
    alert_buffer: Mutex<Vec<AuditLogEntry>>,
    /// Overlap guard: a tick that finds this set is skipped.
    analysis_running: AtomicBool,
    wakeup: Notify,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl SecurityMonitor {
    pub fn new(logger: Arc<AuditLogger>, config: MonitorConfig) -> Self {
        Self {
            logger,
            config,
            patterns: default_patterns(),
            incidents: IncidentManager::new(),
            metrics: MetricsStore::new(),
            incident_callbacks: RwLock::new(Vec::new()),
            session_counter: RwLock::new(None),
            alert_buffer: Mutex::new(Vec::new()),
            analysis_running: AtomicBool::new(false),
            wakeup: Notify::new(),
            monitor_task: Mutex::new(None),
        }
    }

    /// Subscribe to the audit logger's alert stream. Buffered entries join the
    /// next analysis run; a critical entry wakes the loop immediately.
    pub fn attach(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.logger.on_alert(move |entry| {
            let Some(monitor) = weak.upgrade() else {
                return;
            };
            monitor.alert_buffer.lock().push(entry.clone());
            if entry.risk_level == RiskLevel::Critical {
                monitor.wakeup.notify_one();
            }
        });
    }

    /// Start the periodic detection and metrics loop.
    pub fn spawn(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.analysis_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = monitor.wakeup.notified() => {}
                }
                monitor.run_cycle().await;
            }
        });
        if let Some(previous) = self.monitor_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the monitoring loop.
    pub fn shutdown(&self) {
        if let Some(handle) = self.monitor_task.lock().take() {
            handle.abort();
        }
    }

    /// One detection-plus-metrics cycle, skipped if one is already running.
    pub async fn run_cycle(&self) {
        if self.analysis_running.swap(true, Ordering::SeqCst) {
            tracing::warn!("analysis tick still running, skipping");
            return;
        }
        self.analyze_security_events().await;
        self.update_metrics().await;
        self.analysis_running.store(false, Ordering::SeqCst);
    }

    /// Evaluate every pattern against recent entries plus the alert buffer.
    pub async fn analyze_security_events(&self) {
        let now = Utc::now();
        let filter = QueryFilter {
            limit: Some(self.config.query_limit),
            ..QueryFilter::range(now - Duration::hours(self.config.lookback_hours), now)
        };
        let mut combined = self.logger.query_logs(&filter).await.entries;
        combined.extend(self.alert_buffer.lock().iter().cloned());

        for pattern in &self.patterns {
            let Some(matched) = patterns::evaluate(pattern, &combined, now) else {
                continue;
            };
            let matched: Vec<AuditLogEntry> = matched.into_iter().cloned().collect();
            match self.incidents.record_match(pattern, matched, now) {
                MatchOutcome::Created(incident) => {
                    tracing::warn!(
                        pattern = %incident.pattern,
                        severity = ?incident.severity,
                        "security incident opened"
                    );
                    self.fire_incident_callbacks(&incident);
                    if incident.severity == RiskLevel::Critical {
                        self.escalate_incident(&incident.id).await;
                    }
                }
                MatchOutcome::Merged(id) => {
                    tracing::debug!(incident = %id, "pattern match merged");
                }
            }
        }

        self.alert_buffer.lock().clear();
    }

    /// Snapshot the last hour of activity into the metrics store.
    pub async fn update_metrics(&self) {
        let now = Utc::now();
        let filter = QueryFilter {
            limit: Some(self.config.query_limit),
            ..QueryFilter::range(now - Duration::hours(1), now)
        };
        let page = self.logger.query_logs(&filter).await;
        let active_sessions = self
            .session_counter
            .read()
            .as_ref()
            .map_or(0, |counter| counter());
        self.metrics
            .record(SecurityMetrics::compute(&page.entries, active_sessions, now));
    }

    /// Register a callback fired for each newly created incident. Callbacks
    /// are isolated from each other.
    pub fn on_incident(&self, callback: impl Fn(&SecurityIncident) + Send + Sync + 'static) {
        self.incident_callbacks.write().push(Arc::new(callback));
    }

    /// Supply the active-session count for metrics snapshots. Sessions live in
    /// an external system; without a provider the count reads 0.
    pub fn set_session_counter(&self, counter: impl Fn() -> u64 + Send + Sync + 'static) {
        *self.session_counter.write() = Some(Arc::new(counter));
    }

    fn fire_incident_callbacks(&self, incident: &SecurityIncident) {
        let callbacks = self.incident_callbacks.read().clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(incident))).is_err() {
                tracing::error!(incident = %incident.id, "incident callback panicked");
            }
        }
    }

    /// Move an incident to `investigating` and record the escalation in the
    /// audit trail.
    pub async fn escalate_incident(&self, id: &str) {
        let Some(incident) = self.incidents.escalate(id) else {
            return;
        };
        self.logger
            .log(
                AuditEventType::SecurityViolation,
                EventContext {
                    resource_type: Some("security_incident".to_string()),
                    resource_id: Some(incident.id.clone()),
                    payload: Some(json!({
                        "incident_type": incident.pattern,
                        "severity": incident.severity,
                        "escalated": true,
                    })),
                    ..Default::default()
                },
            )
            .await;
    }

    /// Resolve an incident with a note and record the resolution.
    pub async fn resolve_incident(&self, id: &str, resolution: &str) {
        let Some(incident) = self.incidents.resolve(id, resolution) else {
            return;
        };
        self.logger
            .log(
                AuditEventType::SecurityViolation,
                EventContext {
                    resource_type: Some("security_incident".to_string()),
                    resource_id: Some(incident.id.clone()),
                    payload: Some(json!({
                        "action": "resolved",
                        "resolution": resolution,
                    })),
                    ..Default::default()
                },
            )
            .await;
    }

    /// Close a resolved incident.
    pub fn close_incident(&self, id: &str) -> Option<SecurityIncident> {
        self.incidents.close(id)
    }

    pub fn incident(&self, id: &str) -> Option<SecurityIncident> {
        self.incidents.get(id)
    }

    pub fn active_incidents(&self) -> Vec<SecurityIncident> {
        self.incidents.active()
    }

    pub fn all_incidents(&self) -> Vec<SecurityIncident> {
        self.incidents.all()
    }

    pub fn current_metrics(&self) -> Option<SecurityMetrics> {
        self.metrics.latest()
    }

    pub fn metrics_history(&self, hours: i64) -> Vec<SecurityMetrics> {
        self.metrics.history(hours)
    }

    /// Current security posture as a 0-100 score.
    pub fn health_score(&self) -> u32 {
        health_score(self.metrics.latest().as_ref(), &self.incidents.active())
    }

    /// Posture summary for dashboards.
    pub fn security_summary(&self) -> SecuritySummary {
        let latest = self.metrics.latest();
        let active = self.incidents.active();
        let critical_incidents = active
            .iter()
            .filter(|incident| incident.severity == RiskLevel::Critical)
            .count();

        let mut threat_counts: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for incident in &active {
            *threat_counts.entry(incident.pattern.as_str()).or_insert(0) += 1;
        }
        let mut top_threats: Vec<(&str, usize)> = threat_counts.into_iter().collect();
        top_threats.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        SecuritySummary {
            health_score: health_score(latest.as_ref(), &active),
            active_incidents: active.len(),
            critical_incidents,
            recent_alerts: latest
                .as_ref()
                .map_or(0, |m| m.critical_events + m.suspicious_activity),
            metrics: latest,
            top_threats: top_threats
                .into_iter()
                .take(TOP_THREATS)
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }
}

/// Health score: 100 minus capped deductions per metric category, minus a flat
/// charge per active critical/high incident, floored at 0.
pub fn health_score(metrics: Option<&SecurityMetrics>, active: &[SecurityIncident]) -> u32 {
    let mut score: i64 = 100;

    if let Some(m) = metrics {
        score -= (2 * m.failed_logins as i64).min(20);
        score -= (5 * m.mfa_failures as i64).min(25);
        score -= (3 * m.access_denials as i64).min(15);
        score -= (10 * m.critical_events as i64).min(30);
        score -= (4 * m.suspicious_activity as i64).min(20);
    }

    let critical = active
        .iter()
        .filter(|i| i.severity == RiskLevel::Critical)
        .count() as i64;
    let high = active
        .iter()
        .filter(|i| i.severity == RiskLevel::High)
        .count() as i64;
    score -= 15 * critical + 10 * high;

    score.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicsec_audit::helpers::log_data_export;
    use clinicsec_audit::{AuditConfig, MemoryStore};
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<AuditLogger>, Arc<SecurityMonitor>) {
        let store = Arc::new(MemoryStore::new());
        let logger = Arc::new(AuditLogger::new(store, AuditConfig::default()));
        let monitor = Arc::new(SecurityMonitor::new(
            logger.clone(),
            MonitorConfig::default(),
        ));
        monitor.attach();
        (logger, monitor)
    }

    async fn failed_login(logger: &AuditLogger, ip: &str) {
        logger
            .log(
                AuditEventType::LoginFailed,
                EventContext {
                    actor_id: Some("alice".to_string()),
                    ip_address: Some(ip.to_string()),
                    success: Some(false),
                    error_message: Some("bad password".to_string()),
                    ..Default::default()
                },
            )
            .await;
    }

    #[tokio::test]
    async fn bruteforce_scenario_creates_then_merges_one_incident() {
        let (logger, monitor) = setup();

        for _ in 0..6 {
            failed_login(&logger, "10.0.0.5").await;
        }
        monitor.run_cycle().await;

        let active = monitor.active_incidents();
        assert_eq!(active.len(), 1);
        let incident = &active[0];
        assert_eq!(incident.pattern, "bruteforce_login");
        assert_eq!(incident.severity, RiskLevel::High);
        assert_eq!(incident.status, IncidentStatus::Open);
        assert_eq!(incident.ip_address.as_deref(), Some("10.0.0.5"));
        let id = incident.id.clone();
        let events_before = incident.events.len();

        // A seventh failure minutes later merges instead of opening a sibling.
        failed_login(&logger, "10.0.0.5").await;
        monitor.run_cycle().await;

        let active = monitor.active_incidents();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
        assert!(active[0].events.len() > events_before);
    }

    #[tokio::test]
    async fn large_export_opens_critical_incident_and_escalates() {
        let (logger, monitor) = setup();

        log_data_export(&logger, "analyst", "csv", 1_500, None).await;
        monitor.run_cycle().await;

        let incident = monitor
            .all_incidents()
            .into_iter()
            .find(|i| i.pattern == "suspicious_export")
            .unwrap();
        assert_eq!(incident.severity, RiskLevel::Critical);
        assert_eq!(incident.status, IncidentStatus::Investigating);

        // The escalation itself lands in the audit trail.
        let page = logger
            .query_logs(&QueryFilter {
                event_type: Some(AuditEventType::SecurityViolation),
                ..Default::default()
            })
            .await;
        assert_eq!(page.total, 1);
        assert_eq!(
            page.entries[0].resource_id.as_deref(),
            Some(incident.id.as_str())
        );
    }

    #[tokio::test]
    async fn incident_callbacks_fire_once_per_creation() {
        let (logger, monitor) = setup();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        monitor.on_incident(move |incident| {
            assert_eq!(incident.pattern, "bruteforce_login");
            counter.fetch_add(1, Ordering::Relaxed);
        });

        for _ in 0..6 {
            failed_login(&logger, "10.0.0.5").await;
        }
        monitor.run_cycle().await;
        // Merge on the next cycle, no second callback.
        failed_login(&logger, "10.0.0.5").await;
        monitor.run_cycle().await;

        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn panicking_incident_callback_is_isolated() {
        let (logger, monitor) = setup();
        monitor.on_incident(|_| panic!("subscriber bug"));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        monitor.on_incident(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        for _ in 0..6 {
            failed_login(&logger, "10.0.0.5").await;
        }
        monitor.run_cycle().await;
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn critical_alerts_are_buffered_for_immediate_analysis() {
        let (logger, monitor) = setup();
        logger
            .log(AuditEventType::SystemConfigChanged, EventContext::actor("admin"))
            .await;
        assert_eq!(monitor.alert_buffer.lock().len(), 1);

        monitor.run_cycle().await;
        assert!(monitor.alert_buffer.lock().is_empty());
        assert_eq!(monitor.active_incidents()[0].pattern, "config_changes");
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let (logger, monitor) = setup();
        logger
            .log(AuditEventType::SystemConfigChanged, EventContext::actor("admin"))
            .await;

        monitor.analysis_running.store(true, Ordering::SeqCst);
        monitor.run_cycle().await;
        // Skipped: the buffer was not consumed and no incident was opened.
        assert_eq!(monitor.alert_buffer.lock().len(), 1);
        assert!(monitor.active_incidents().is_empty());

        monitor.analysis_running.store(false, Ordering::SeqCst);
        monitor.run_cycle().await;
        assert_eq!(monitor.active_incidents().len(), 1);
    }

    #[tokio::test]
    async fn metrics_snapshot_uses_session_counter() {
        let (logger, monitor) = setup();
        monitor.set_session_counter(|| 42);

        failed_login(&logger, "10.0.0.5").await;
        monitor.update_metrics().await;

        let metrics = monitor.current_metrics().unwrap();
        assert_eq!(metrics.failed_logins, 1);
        assert_eq!(metrics.active_sessions, 42);
    }

    #[tokio::test]
    async fn resolve_records_the_resolution_in_the_audit_trail() {
        let (logger, monitor) = setup();
        for _ in 0..6 {
            failed_login(&logger, "10.0.0.5").await;
        }
        monitor.run_cycle().await;
        let id = monitor.active_incidents()[0].id.clone();

        monitor.resolve_incident(&id, "credentials rotated").await;
        let incident = monitor.incident(&id).unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
        assert_eq!(incident.resolution.as_deref(), Some("credentials rotated"));

        let page = logger
            .query_logs(&QueryFilter {
                event_type: Some(AuditEventType::SecurityViolation),
                ..Default::default()
            })
            .await;
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn summary_reports_posture_and_top_threats() {
        let (logger, monitor) = setup();
        for _ in 0..6 {
            failed_login(&logger, "10.0.0.5").await;
        }
        monitor.run_cycle().await;

        let summary = monitor.security_summary();
        assert_eq!(summary.active_incidents, 1);
        assert_eq!(summary.critical_incidents, 0);
        assert_eq!(summary.top_threats, vec!["bruteforce_login".to_string()]);
        assert!(summary.health_score < 100);
        assert_eq!(
            summary.recent_alerts,
            summary
                .metrics
                .as_ref()
                .map_or(0, |m| m.critical_events + m.suspicious_activity)
        );
    }

    #[test]
    fn health_score_is_bounded_and_non_increasing() {
        let base = SecurityMetrics::compute(&[], 0, Utc::now());
        assert_eq!(health_score(Some(&base), &[]), 100);
        assert_eq!(health_score(None, &[]), 100);

        let mut worse = base.clone();
        let mut previous = 100;
        for failures in 1..30 {
            worse.failed_logins = failures;
            let score = health_score(Some(&worse), &[]);
            assert!(score <= previous);
            previous = score;
        }
        // Failed logins alone cap at a 20-point deduction.
        assert_eq!(previous, 80);

        let mut floor = base.clone();
        floor.failed_logins = 100;
        floor.mfa_failures = 100;
        floor.access_denials = 100;
        floor.critical_events = 100;
        floor.suspicious_activity = 100;
        assert_eq!(health_score(Some(&floor), &[]), 0);
    }
}
