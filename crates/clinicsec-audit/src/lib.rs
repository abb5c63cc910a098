//! Clinic Security Audit Pipeline
//!
//! Event ingestion, risk classification, payload sanitization, and buffered
//! persistence for the clinic platform's audit trail:
//! - Closed event vocabulary with per-type risk tiers
//! - One-way hashing of sensitive payload fields
//! - Write buffer with synchronous flush for high-risk events
//! - Query, reporting, and retention over an external store
//!
//! The pipeline is best-effort observability: no store or callback failure is
//! ever propagated to the business operation that produced the event.

pub mod event;
pub mod helpers;
pub mod logger;
pub mod report;
pub mod risk;
pub mod sanitize;
pub mod store;

pub use event::{AuditEventType, AuditLogEntry, EventContext, RiskLevel};
pub use logger::{AuditConfig, AuditLogger};
pub use report::{AuditReport, ReportOptions};
pub use store::{AuditStore, MemoryStore, QueryFilter, QueryPage, StoreError};
