//! Audit store contract
//!
//! Persistence is an external collaborator: batch insert, filtered and
//! paginated select with an exact total, and range delete by age. The bundled
//! [`MemoryStore`] implements the contract for tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::event::{AuditEventType, AuditLogEntry, RiskLevel};

/// Audit store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Write rejected by the store
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Filter for [`AuditStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub actor_id: Option<String>,
    pub event_type: Option<AuditEventType>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub risk_level: Option<RiskLevel>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryFilter {
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(actor) = &self.actor_id {
            if entry.actor_id.as_deref() != Some(actor.as_str()) {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(resource_type) = &self.resource_type {
            if entry.resource_type.as_deref() != Some(resource_type.as_str()) {
                return false;
            }
        }
        if let Some(resource_id) = &self.resource_id {
            if entry.resource_id.as_deref() != Some(resource_id.as_str()) {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(risk) = self.risk_level {
            if entry.risk_level != risk {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }
}

/// One page of query results plus the exact match count.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: u64,
}

/// External persistence contract for audit entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_batch(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError>;

    /// Filtered select, ordered by timestamp descending, with an exact total.
    async fn query(&self, filter: &QueryFilter) -> Result<QueryPage, StoreError>;

    /// Delete entries older than the cutoff; returns the count removed.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// In-memory implementation of [`AuditStore`].
#[derive(Default)]
pub struct MemoryStore {
    rows: parking_lot::RwLock<Vec<AuditLogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn insert_batch(&self, entries: &[AuditLogEntry]) -> Result<(), StoreError> {
        let mut rows = self.rows.write();
        for entry in entries {
            let mut row = entry.clone();
            row.id = Some(Uuid::new_v4().to_string());
            rows.push(row);
        }
        Ok(())
    }

    async fn query(&self, filter: &QueryFilter) -> Result<QueryPage, StoreError> {
        let rows = self.rows.read();
        let mut matched: Vec<AuditLogEntry> = rows
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matched.len() as u64;
        let offset = filter.offset.unwrap_or(0).min(matched.len());
        let mut entries = matched.split_off(offset);
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(QueryPage { entries, total })
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|entry| entry.timestamp >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}
