//! Domain logging helpers
//!
//! Thin wrappers over [`AuditLogger::log`] for the clinic's common flows, so
//! call sites pick an action instead of an event type and the resource fields
//! stay consistent.

use serde_json::{json, Value};

use crate::event::{AuditEventType, EventContext};
use crate::logger::AuditLogger;

#[derive(Debug, Clone, Copy)]
pub enum PatientAction {
    Viewed,
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy)]
pub enum RecordAction {
    Viewed,
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy)]
pub enum PrescriptionAction {
    Created,
    Dispensed,
}

#[derive(Debug, Clone, Copy)]
pub enum BillingAction {
    Created,
    Viewed,
    Payment,
    Refund,
}

pub async fn log_patient_access(
    logger: &AuditLogger,
    actor_id: &str,
    patient_id: &str,
    action: PatientAction,
    metadata: Option<Value>,
) {
    let event_type = match action {
        PatientAction::Viewed => AuditEventType::PatientViewed,
        PatientAction::Created => AuditEventType::PatientCreated,
        PatientAction::Updated => AuditEventType::PatientUpdated,
        PatientAction::Deleted => AuditEventType::PatientDeleted,
    };
    logger
        .log(
            event_type,
            EventContext {
                actor_id: Some(actor_id.to_string()),
                resource_type: Some("patient".to_string()),
                resource_id: Some(patient_id.to_string()),
                metadata,
                ..Default::default()
            },
        )
        .await;
}

pub async fn log_medical_record_access(
    logger: &AuditLogger,
    actor_id: &str,
    record_id: &str,
    patient_id: &str,
    action: RecordAction,
    metadata: Option<Value>,
) {
    let event_type = match action {
        RecordAction::Viewed => AuditEventType::MedicalRecordViewed,
        RecordAction::Created => AuditEventType::MedicalRecordCreated,
        RecordAction::Updated => AuditEventType::MedicalRecordUpdated,
    };
    logger
        .log(
            event_type,
            EventContext {
                actor_id: Some(actor_id.to_string()),
                resource_type: Some("medical_record".to_string()),
                resource_id: Some(record_id.to_string()),
                metadata: Some(with_patient(metadata, patient_id)),
                ..Default::default()
            },
        )
        .await;
}

pub async fn log_prescription_event(
    logger: &AuditLogger,
    actor_id: &str,
    prescription_id: &str,
    patient_id: &str,
    action: PrescriptionAction,
    metadata: Option<Value>,
) {
    let event_type = match action {
        PrescriptionAction::Created => AuditEventType::PrescriptionCreated,
        PrescriptionAction::Dispensed => AuditEventType::PrescriptionDispensed,
    };
    logger
        .log(
            event_type,
            EventContext {
                actor_id: Some(actor_id.to_string()),
                resource_type: Some("prescription".to_string()),
                resource_id: Some(prescription_id.to_string()),
                metadata: Some(with_patient(metadata, patient_id)),
                ..Default::default()
            },
        )
        .await;
}

pub async fn log_billing_event(
    logger: &AuditLogger,
    actor_id: &str,
    invoice_id: &str,
    patient_id: &str,
    action: BillingAction,
    metadata: Option<Value>,
) {
    let event_type = match action {
        BillingAction::Created => AuditEventType::InvoiceCreated,
        BillingAction::Viewed => AuditEventType::BillingViewed,
        BillingAction::Payment => AuditEventType::PaymentProcessed,
        BillingAction::Refund => AuditEventType::RefundProcessed,
    };
    logger
        .log(
            event_type,
            EventContext {
                actor_id: Some(actor_id.to_string()),
                resource_type: Some("invoice".to_string()),
                resource_id: Some(invoice_id.to_string()),
                metadata: Some(with_patient(metadata, patient_id)),
                ..Default::default()
            },
        )
        .await;
}

/// Export logging carries the record count in the payload; the detector keys
/// its volume check off that field.
pub async fn log_data_export(
    logger: &AuditLogger,
    actor_id: &str,
    export_type: &str,
    record_count: u64,
    metadata: Option<Value>,
) {
    logger
        .log(
            AuditEventType::DataExport,
            EventContext {
                actor_id: Some(actor_id.to_string()),
                resource_type: Some("data_export".to_string()),
                payload: Some(json!({
                    "export_type": export_type,
                    "record_count": record_count,
                })),
                metadata,
                ..Default::default()
            },
        )
        .await;
}

fn with_patient(metadata: Option<Value>, patient_id: &str) -> Value {
    match metadata {
        Some(Value::Object(mut map)) => {
            map.insert("patient_id".to_string(), json!(patient_id));
            Value::Object(map)
        }
        _ => json!({ "patient_id": patient_id }),
    }
}
