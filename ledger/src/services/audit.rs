//! Audit events for ledger-affecting operations
//!
//! Events are written inside the same transaction as the mutation they
//! describe, so an audit row exists exactly when the operation committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppResult;

/// Audit service for management-facing reads of the event log
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

/// Kinds of audit events the ledger emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TransferPosted,
    PurchaseReceived,
    ProductionCompleted,
    CountVariance,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::TransferPosted => "transfer_posted",
            AuditEventType::PurchaseReceived => "purchase_received",
            AuditEventType::ProductionCompleted => "production_completed",
            AuditEventType::CountVariance => "count_variance",
        }
    }
}

/// A persisted audit event
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: AuditEventType,
    pub reference_id: Uuid,
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Record an audit event in the caller's transaction
pub(crate) async fn record_event(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    event_type: AuditEventType,
    reference_id: Uuid,
    detail: serde_json::Value,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_log (tenant_id, event_type, reference_id, detail)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(tenant_id)
    .bind(event_type.as_str())
    .bind(reference_id)
    .bind(&detail)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

impl AuditService {
    /// Create a new AuditService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// List recent audit events for a tenant, most recent first
    pub async fn list_events(&self, tenant_id: Uuid, limit: i64) -> AppResult<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, tenant_id, event_type, reference_id, detail, created_at
            FROM audit_log
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(events)
    }

    /// List audit events attached to one reference (a transfer, order or
    /// stock take)
    pub async fn events_for_reference(
        &self,
        tenant_id: Uuid,
        reference_id: Uuid,
    ) -> AppResult<Vec<AuditEvent>> {
        let events = sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT id, tenant_id, event_type, reference_id, detail, created_at
            FROM audit_log
            WHERE tenant_id = $1 AND reference_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(reference_id)
        .fetch_all(&self.db)
        .await?;

        Ok(events)
    }
}
