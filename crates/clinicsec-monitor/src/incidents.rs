//! Security incidents
//!
//! Incidents aggregate pattern matches. A match for a pattern that already has
//! an open or investigating incident created within the last hour merges into
//! it instead of spawning a sibling.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use clinicsec_audit::{AuditLogEntry, RiskLevel};

use crate::patterns::ThreatPattern;

/// Most recent contributing events kept per incident.
const MAX_INCIDENT_EVENTS: usize = 20;

/// New matches merge into an existing incident created within this window.
const DEDUP_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityIncident {
    /// `{pattern}_{creation millis}`
    pub id: String,
    pub pattern: String,
    pub severity: RiskLevel,
    pub description: String,
    pub status: IncidentStatus,
    /// Populated only when every contributing event names the same actor.
    pub actor_id: Option<String>,
    /// Populated only when every contributing event names the same address.
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Most recent contributing events, at most [`MAX_INCIDENT_EVENTS`].
    pub events: Vec<AuditLogEntry>,
    pub alert_message: String,
    pub detected_at: DateTime<Utc>,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SecurityIncident {
    pub fn is_active(&self) -> bool {
        matches!(self.status, IncidentStatus::Open | IncidentStatus::Investigating)
    }
}

/// Outcome of feeding a pattern match to the manager.
pub enum MatchOutcome {
    /// A new incident was opened.
    Created(SecurityIncident),
    /// The match merged into the named existing incident.
    Merged(String),
}

/// Owns the incident map. Only the manager mutates incidents; readers get
/// clones.
#[derive(Default)]
pub struct IncidentManager {
    incidents: DashMap<String, SecurityIncident>,
}

impl IncidentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or merge an incident for a pattern match.
    pub fn record_match(
        &self,
        pattern: &ThreatPattern,
        matches: Vec<AuditLogEntry>,
        now: DateTime<Utc>,
    ) -> MatchOutcome {
        let dedup_cutoff = now - Duration::minutes(DEDUP_WINDOW_MINUTES);
        let existing = self
            .incidents
            .iter()
            .find(|incident| {
                incident.pattern == pattern.name
                    && incident.is_active()
                    && incident.created_at > dedup_cutoff
            })
            .map(|incident| incident.id.clone());

        if let Some(id) = existing {
            if let Some(mut incident) = self.incidents.get_mut(&id) {
                incident.events.extend(matches);
                retain_most_recent(&mut incident.events);
                incident.updated_at = now;
            }
            return MatchOutcome::Merged(id);
        }

        let mut events = matches;
        retain_most_recent(&mut events);

        let incident = SecurityIncident {
            id: format!("{}_{}", pattern.name, now.timestamp_millis()),
            pattern: pattern.name.to_string(),
            severity: pattern.severity,
            description: pattern.description.to_string(),
            status: IncidentStatus::Open,
            actor_id: sole_value(&events, |e| e.actor_id.as_deref()),
            ip_address: sole_value(&events, |e| e.ip_address.as_deref()),
            created_at: now,
            updated_at: now,
            events,
            alert_message: pattern.alert_message.to_string(),
            detected_at: now,
            resolution: None,
            resolved_at: None,
        };
        self.incidents.insert(incident.id.clone(), incident.clone());
        MatchOutcome::Created(incident)
    }

    /// `open` → `investigating`. Returns the updated incident.
    pub fn escalate(&self, id: &str) -> Option<SecurityIncident> {
        let mut incident = self.incidents.get_mut(id)?;
        if incident.status != IncidentStatus::Open {
            return None;
        }
        incident.status = IncidentStatus::Investigating;
        incident.updated_at = Utc::now();
        Some(incident.clone())
    }

    /// `open`/`investigating` → `resolved`, with a required resolution note.
    pub fn resolve(&self, id: &str, resolution: &str) -> Option<SecurityIncident> {
        let mut incident = self.incidents.get_mut(id)?;
        if !incident.is_active() {
            return None;
        }
        let now = Utc::now();
        incident.status = IncidentStatus::Resolved;
        incident.resolution = Some(resolution.to_string());
        incident.resolved_at = Some(now);
        incident.updated_at = now;
        Some(incident.clone())
    }

    /// `resolved` → `closed` (terminal).
    pub fn close(&self, id: &str) -> Option<SecurityIncident> {
        let mut incident = self.incidents.get_mut(id)?;
        if incident.status != IncidentStatus::Resolved {
            return None;
        }
        incident.status = IncidentStatus::Closed;
        incident.updated_at = Utc::now();
        Some(incident.clone())
    }

    pub fn get(&self, id: &str) -> Option<SecurityIncident> {
        self.incidents.get(id).map(|incident| incident.clone())
    }

    /// Open and investigating incidents, most severe first, then most recent.
    pub fn active(&self) -> Vec<SecurityIncident> {
        let mut active: Vec<SecurityIncident> = self
            .incidents
            .iter()
            .filter(|incident| incident.is_active())
            .map(|incident| incident.clone())
            .collect();
        active.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
        });
        active
    }

    /// Every incident, most recent first.
    pub fn all(&self) -> Vec<SecurityIncident> {
        let mut all: Vec<SecurityIncident> = self
            .incidents
            .iter()
            .map(|incident| incident.clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

/// Cap the contributing events at [`MAX_INCIDENT_EVENTS`], keeping the
/// greatest-timestamp entries. Match lists arrive in store order (newest
/// first), so a positional cut would discard the wrong end.
fn retain_most_recent(events: &mut Vec<AuditLogEntry>) {
    if events.len() > MAX_INCIDENT_EVENTS {
        events.sort_by_key(|e| e.timestamp);
        let overflow = events.len() - MAX_INCIDENT_EVENTS;
        events.drain(..overflow);
    }
}

/// The single distinct value across events, if there is exactly one.
fn sole_value(
    events: &[AuditLogEntry],
    field: impl Fn(&AuditLogEntry) -> Option<&str>,
) -> Option<String> {
    let mut values = events.iter().filter_map(&field);
    let first = values.next()?;
    values.all(|v| v == first).then(|| first.to_string())
}
