//! Purchase order receipt into the stock ledger
//!
//! Receiving only ever increments stock, so it cannot fail on
//! insufficiency. The downstream accounting post runs after the stock
//! transition commits and must never block or reverse it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use shared::{validate_lines_non_empty, validate_positive_quantity};

use crate::error::{AppError, AppResult};
use crate::services::audit::{self, AuditEventType};
use crate::services::catalog;
use crate::services::quants::{apply_adjustment, MovementType, QuantKey};

/// Downstream accounting integration, called best-effort after a receipt
/// commits
#[async_trait]
pub trait AccountingHook: Send + Sync {
    async fn post_receipt(&self, tenant_id: Uuid, purchase_order_id: Uuid) -> anyhow::Result<()>;
}

/// Procurement service for purchase orders and their receipt
#[derive(Clone)]
pub struct ProcurementService {
    db: PgPool,
    accounting: Option<Arc<dyn AccountingHook>>,
}

/// Lifecycle of a purchase order; Received is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Received,
}

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "ordered" => Some(PurchaseOrderStatus::Ordered),
            "received" => Some(PurchaseOrderStatus::Received),
            _ => None,
        }
    }

    /// Receipt is legal from Draft or Ordered
    pub fn can_receive(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Ordered)
    }
}

/// A purchase order header
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub supplier_name: String,
    pub status: PurchaseOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A purchase order line
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PurchaseOrderLine {
    pub id: Uuid,
    pub purchase_order_id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// A purchase order with its lines
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOrderWithLines {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub lines: Vec<PurchaseOrderLine>,
}

/// Input line for a new purchase order
#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineInput {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Input for creating a purchase order
#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderInput {
    pub supplier_name: String,
    pub lines: Vec<PurchaseOrderLineInput>,
}

impl ProcurementService {
    /// Create a new ProcurementService instance
    pub fn new(db: PgPool) -> Self {
        Self {
            db,
            accounting: None,
        }
    }

    /// Attach a downstream accounting hook
    pub fn with_accounting(mut self, hook: Arc<dyn AccountingHook>) -> Self {
        self.accounting = Some(hook);
        self
    }

    /// Create a purchase order in Draft status
    pub async fn create_purchase_order(
        &self,
        tenant_id: Uuid,
        input: CreatePurchaseOrderInput,
    ) -> AppResult<PurchaseOrderWithLines> {
        if input.supplier_name.trim().is_empty() {
            return Err(AppError::validation(
                "supplier_name",
                "Supplier name is required",
            ));
        }
        validate_lines_non_empty(input.lines.len())
            .map_err(|msg| AppError::validation("lines", msg))?;
        for line in &input.lines {
            validate_positive_quantity(line.quantity)
                .map_err(|msg| AppError::validation("quantity", msg))?;
        }

        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            INSERT INTO purchase_orders (tenant_id, supplier_name, status)
            VALUES ($1, $2, 'draft')
            RETURNING id, tenant_id, supplier_name, status, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.supplier_name.trim())
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            catalog::ensure_product(&mut tx, tenant_id, line.product_id).await?;
            catalog::ensure_unit(&mut tx, tenant_id, line.unit_id).await?;

            let inserted = sqlx::query_as::<_, PurchaseOrderLine>(
                r#"
                INSERT INTO purchase_order_lines (purchase_order_id, product_id, unit_id, quantity)
                VALUES ($1, $2, $3, $4)
                RETURNING id, purchase_order_id, product_id, unit_id, quantity
                "#,
            )
            .bind(order.id)
            .bind(line.product_id)
            .bind(line.unit_id)
            .bind(line.quantity)
            .fetch_one(&mut *tx)
            .await?;
            lines.push(inserted);
        }

        tx.commit().await?;

        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// Transition a Draft order to Ordered
    pub async fn mark_ordered(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<PurchaseOrder> {
        let mut tx = self.db.begin().await?;

        let order = self.lock_order(&mut tx, tenant_id, order_id).await?;
        if order.status != PurchaseOrderStatus::Draft {
            return Err(AppError::InvalidState(format!(
                "purchase order {} is {}",
                order_id,
                order.status.as_str()
            )));
        }

        let updated = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            UPDATE purchase_orders
            SET status = 'ordered', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, supplier_name, status, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// Receive a purchase order into a location
    ///
    /// Increments stock for every line and transitions the order to
    /// Received in one transaction. Receiving twice fails with
    /// `InvalidState`. The accounting post is attempted after commit and
    /// its failure only logs a warning.
    pub async fn receive(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
        location_id: Uuid,
    ) -> AppResult<PurchaseOrderWithLines> {
        let mut tx = self.db.begin().await?;

        let order = self.lock_order(&mut tx, tenant_id, order_id).await?;
        if !order.status.can_receive() {
            return Err(AppError::InvalidState(format!(
                "purchase order {} is already {}",
                order_id,
                order.status.as_str()
            )));
        }

        catalog::ensure_location(&mut tx, tenant_id, location_id).await?;

        let lines = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT id, purchase_order_id, product_id, unit_id, quantity
            FROM purchase_order_lines
            WHERE purchase_order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        for line in &lines {
            let key = QuantKey {
                product_id: line.product_id,
                location_id,
                batch_id: None,
                unit_id: line.unit_id,
            };
            apply_adjustment(
                &mut tx,
                tenant_id,
                &key,
                line.quantity,
                MovementType::PurchaseReceipt,
                Some(order_id),
            )
            .await?;
        }

        let received = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            UPDATE purchase_orders
            SET status = 'received', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, supplier_name, status, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        audit::record_event(
            &mut tx,
            tenant_id,
            AuditEventType::PurchaseReceived,
            order_id,
            serde_json::json!({
                "location_id": location_id,
                "line_count": lines.len(),
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            order_id = %order_id,
            location_id = %location_id,
            "purchase order received"
        );

        // Best-effort downstream post; the receipt is already committed
        // and stands regardless of the outcome.
        if let Some(hook) = &self.accounting {
            if let Err(e) = hook.post_receipt(tenant_id, order_id).await {
                tracing::warn!(
                    order_id = %order_id,
                    error = %e,
                    "accounting post for receipt failed"
                );
            }
        }

        Ok(PurchaseOrderWithLines {
            order: received,
            lines,
        })
    }

    /// Get a purchase order with its lines
    pub async fn get_purchase_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<PurchaseOrderWithLines> {
        let order = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            SELECT id, tenant_id, supplier_name, status, created_at, updated_at
            FROM purchase_orders
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Purchase order {order_id}")))?;

        let lines = sqlx::query_as::<_, PurchaseOrderLine>(
            r#"
            SELECT id, purchase_order_id, product_id, unit_id, quantity
            FROM purchase_order_lines
            WHERE purchase_order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.db)
        .await?;

        Ok(PurchaseOrderWithLines { order, lines })
    }

    /// List all purchase orders for a tenant
    pub async fn list_purchase_orders(&self, tenant_id: Uuid) -> AppResult<Vec<PurchaseOrder>> {
        let orders = sqlx::query_as::<_, PurchaseOrder>(
            r#"
            SELECT id, tenant_id, supplier_name, status, created_at, updated_at
            FROM purchase_orders
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(orders)
    }

    async fn lock_order(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<PurchaseOrder> {
        sqlx::query_as::<_, PurchaseOrder>(
            r#"
            SELECT id, tenant_id, supplier_name, status, created_at, updated_at
            FROM purchase_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Purchase order {order_id}")))
    }
}
