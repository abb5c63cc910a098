//! Audit reporting
//!
//! Summaries and optional groupings over a queried set of entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::event::{AuditEventType, AuditLogEntry, RiskLevel};
use crate::store::QueryPage;

/// How many top critical/high events the risk analysis keeps.
const TOP_RISKY_EVENTS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Include successful events; otherwise only failures are reported.
    pub include_success_events: bool,
    pub include_risk_analysis: bool,
    pub group_by_actor: bool,
    pub group_by_event_type: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub summary: ReportSummary,
    pub events: Vec<AuditLogEntry>,
    pub risk_analysis: Option<RiskAnalysis>,
    pub actor_activity: Option<HashMap<String, ActorActivity>>,
    pub event_type_breakdown: Option<HashMap<AuditEventType, EventTypeStats>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_events: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub critical_events: usize,
    pub high_risk_events: usize,
    pub failed_events: usize,
    pub unique_actors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAnalysis {
    pub counts_by_level: HashMap<RiskLevel, usize>,
    /// Failure rate over the reported events, percent with two decimals.
    pub failure_rate: f64,
    pub top_risky_events: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActorActivity {
    pub total_events: usize,
    pub failed_events: usize,
    pub event_types: HashSet<AuditEventType>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventTypeStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub risk_levels: HashMap<RiskLevel, usize>,
}

pub fn build(
    page: QueryPage,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: &ReportOptions,
) -> AuditReport {
    let events = page.entries;

    let summary = ReportSummary {
        total_events: page.total,
        start,
        end,
        critical_events: events
            .iter()
            .filter(|e| e.risk_level == RiskLevel::Critical)
            .count(),
        high_risk_events: events
            .iter()
            .filter(|e| e.risk_level == RiskLevel::High)
            .count(),
        failed_events: events.iter().filter(|e| !e.success).count(),
        unique_actors: events
            .iter()
            .filter_map(|e| e.actor_id.as_deref())
            .collect::<HashSet<_>>()
            .len(),
    };

    let risk_analysis = options.include_risk_analysis.then(|| analyze_risk(&events));
    let actor_activity = options.group_by_actor.then(|| group_by_actor(&events));
    let event_type_breakdown = options
        .group_by_event_type
        .then(|| group_by_event_type(&events));

    AuditReport {
        summary,
        events,
        risk_analysis,
        actor_activity,
        event_type_breakdown,
    }
}

fn analyze_risk(events: &[AuditLogEntry]) -> RiskAnalysis {
    let mut counts_by_level = HashMap::new();
    for event in events {
        *counts_by_level.entry(event.risk_level).or_insert(0) += 1;
    }

    let failure_rate = if events.is_empty() {
        0.0
    } else {
        let failures = events.iter().filter(|e| !e.success).count();
        let rate = failures as f64 / events.len() as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    };

    let top_risky_events = events
        .iter()
        .filter(|e| e.risk_level >= RiskLevel::High)
        .take(TOP_RISKY_EVENTS)
        .cloned()
        .collect();

    RiskAnalysis {
        counts_by_level,
        failure_rate,
        top_risky_events,
    }
}

fn group_by_actor(events: &[AuditLogEntry]) -> HashMap<String, ActorActivity> {
    let mut activity: HashMap<String, ActorActivity> = HashMap::new();
    for event in events {
        let actor = event
            .actor_id
            .clone()
            .unwrap_or_else(|| "anonymous".to_string());
        let stats = activity.entry(actor).or_default();
        stats.total_events += 1;
        if !event.success {
            stats.failed_events += 1;
        }
        stats.event_types.insert(event.event_type);
    }
    activity
}

fn group_by_event_type(events: &[AuditLogEntry]) -> HashMap<AuditEventType, EventTypeStats> {
    let mut breakdown: HashMap<AuditEventType, EventTypeStats> = HashMap::new();
    for event in events {
        let stats = breakdown.entry(event.event_type).or_default();
        stats.total += 1;
        if event.success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        *stats.risk_levels.entry(event.risk_level).or_insert(0) += 1;
    }
    breakdown
}
