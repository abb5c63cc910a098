//! Buffered audit logger
//!
//! Entries are classified, sanitized, and buffered in memory. High-risk
//! entries flush to the store synchronously with the call that produced them;
//! everything else goes out on a fixed timer. Store failures re-queue the
//! batch and cap the buffer so a sustained outage cannot grow memory without
//! bound.

use chrono::{Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::event::{AuditEventType, AuditLogEntry, EventContext, RiskLevel};
use crate::report::{self, AuditReport, ReportOptions};
use crate::risk;
use crate::sanitize;
use crate::store::{AuditStore, QueryFilter, QueryPage};

/// Maximum buffered entries retained after a failed flush.
const BUFFER_CAP: usize = 1_000;

/// Audit pipeline configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    /// Minimum risk tier that gets logged.
    pub log_level: RiskLevel,
    pub retention_days: i64,
    pub enable_real_time_alerts: bool,
    pub anonymize_data: bool,
    /// Flag only; encryption at rest is a store concern.
    pub encrypt_logs: bool,
    pub flush_interval: std::time::Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: RiskLevel::Low,
            // ~7 years, healthcare compliance horizon
            retention_days: 2_555,
            enable_real_time_alerts: true,
            anonymize_data: true,
            encrypt_logs: true,
            flush_interval: std::time::Duration::from_secs(30),
        }
    }
}

type AlertCallback = Arc<dyn Fn(&AuditLogEntry) + Send + Sync>;

/// Audit event ingestion, buffering, and persistence.
///
/// Construct once per process and share via `Arc`. All store failures degrade
/// gracefully; no method here ever surfaces an error to the caller's business
/// operation.
pub struct AuditLogger {
    config: RwLock<AuditConfig>,
    store: Arc<dyn AuditStore>,
    buffer: Mutex<Vec<AuditLogEntry>>,
    alert_callbacks: RwLock<Vec<AlertCallback>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            buffer: Mutex::new(Vec::new()),
            alert_callbacks: RwLock::new(Vec::new()),
            flush_task: Mutex::new(None),
        }
    }

    /// Record an audit event.
    ///
    /// Classification, sanitization, buffer append, conditional flush, and
    /// conditional alerting happen strictly in that order. When this returns
    /// for a `High`/`Critical` entry, the flush attempt (success or safe
    /// re-queue) has completed.
    pub async fn log(&self, event_type: AuditEventType, ctx: EventContext) {
        let config = self.config.read().clone();
        if !config.enabled {
            return;
        }

        let success = ctx.success.unwrap_or(true);
        let risk_level = risk::classify(event_type, success, ctx.error_message.is_some());
        if risk_level < config.log_level {
            return;
        }

        let payload = ctx.payload.map(|mut payload| {
            if config.anonymize_data {
                sanitize::sanitize(&mut payload);
            }
            payload
        });

        let entry = AuditLogEntry {
            id: None,
            actor_id: ctx.actor_id,
            session_id: ctx.session_id,
            event_type,
            payload,
            resource_type: ctx.resource_type,
            resource_id: ctx.resource_id,
            ip_address: ctx.ip_address,
            user_agent: ctx.user_agent,
            risk_level,
            success,
            error_message: ctx.error_message,
            timestamp: Utc::now(),
            metadata: ctx.metadata,
        };

        self.buffer.lock().push(entry.clone());

        if risk_level >= RiskLevel::High {
            self.flush().await;
        }

        if config.enable_real_time_alerts && should_alert(&entry) {
            self.trigger_alert(&entry);
        }
    }

    /// Persist everything currently buffered.
    ///
    /// On store failure the batch goes back to the front of the buffer, then
    /// the buffer is capped at [`BUFFER_CAP`] entries, oldest dropped first.
    pub async fn flush(&self) {
        let entries = std::mem::take(&mut *self.buffer.lock());
        if entries.is_empty() {
            return;
        }

        match self.store.insert_batch(&entries).await {
            Ok(()) => {
                tracing::debug!(count = entries.len(), "flushed audit entries");
            }
            Err(err) => {
                tracing::warn!(error = %err, count = entries.len(), "audit flush failed, re-queueing");
                let mut buffer = self.buffer.lock();
                let mut restored = entries;
                restored.append(&mut buffer);
                if restored.len() > BUFFER_CAP {
                    let overflow = restored.len() - BUFFER_CAP;
                    restored.drain(..overflow);
                }
                *buffer = restored;
            }
        }
    }

    /// Start the periodic flush task.
    pub fn spawn_auto_flush(self: &Arc<Self>) {
        let logger = Arc::clone(self);
        let interval = self.config.read().flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                logger.flush().await;
            }
        });
        if let Some(previous) = self.flush_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the flush timer and perform one final flush. Call during graceful
    /// shutdown so buffered entries are not lost.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.flush_task.lock().take() {
            handle.abort();
        }
        self.flush().await;
    }

    /// Register a callback fired for every alerting entry. Callbacks are
    /// isolated from each other; a panicking subscriber is logged and skipped.
    pub fn on_alert(&self, callback: impl Fn(&AuditLogEntry) + Send + Sync + 'static) {
        self.alert_callbacks.write().push(Arc::new(callback));
    }

    fn trigger_alert(&self, entry: &AuditLogEntry) {
        let callbacks = self.alert_callbacks.read().clone();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(entry))).is_err() {
                tracing::error!(event_type = ?entry.event_type, "alert callback panicked");
            }
        }
    }

    /// Query persisted entries. Never errors: a store failure yields an empty
    /// page with total 0.
    pub async fn query_logs(&self, filter: &QueryFilter) -> QueryPage {
        match self.store.query(filter).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(error = %err, "audit query failed");
                QueryPage::default()
            }
        }
    }

    /// Build an audit report over a time range.
    pub async fn generate_report(
        &self,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        options: &ReportOptions,
    ) -> AuditReport {
        let filter = QueryFilter {
            success: if options.include_success_events {
                None
            } else {
                Some(false)
            },
            ..QueryFilter::range(start, end)
        };
        let page = self.query_logs(&filter).await;
        report::build(page, start, end, options)
    }

    /// Delete entries past the retention horizon; returns the count removed,
    /// or 0 when the store call fails.
    pub async fn cleanup_old_logs(&self) -> u64 {
        let cutoff = Utc::now() - Duration::days(self.config.read().retention_days);
        match self.store.delete_before(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::debug!(deleted, "removed expired audit entries");
                }
                deleted
            }
            Err(err) => {
                tracing::warn!(error = %err, "audit retention cleanup failed");
                0
            }
        }
    }

    pub fn update_config(&self, config: AuditConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> AuditConfig {
        self.config.read().clone()
    }

    /// Number of entries currently buffered and not yet persisted.
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }
}

fn should_alert(entry: &AuditLogEntry) -> bool {
    entry.risk_level >= RiskLevel::High || !entry.success
}
