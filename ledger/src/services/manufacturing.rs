//! Bills of materials and production orders
//!
//! Completing a production order consumes every BOM component scaled by
//! the order quantity and yields the parent product, all in one
//! transaction. The first insufficient component aborts everything.

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

/// Manufacturing service for BOMs and production orders
#[derive(Clone)]
pub struct ManufacturingService {
    db: PgPool,
}

/// Lifecycle of a production order; Completed and Cancelled are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductionOrderStatus {
    Planned,
    Completed,
    Cancelled,
}

impl ProductionOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionOrderStatus::Planned => "planned",
            ProductionOrderStatus::Completed => "completed",
            ProductionOrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "planned" => Some(ProductionOrderStatus::Planned),
            "completed" => Some(ProductionOrderStatus::Completed),
            "cancelled" => Some(ProductionOrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, ProductionOrderStatus::Planned)
    }
}

/// A bill of materials header
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BillOfMaterials {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// The parent product this BOM produces
    pub product_id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A BOM component line: quantity needed per one unit of the parent
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BomLine {
    pub id: Uuid,
    pub bom_id: Uuid,
    pub component_product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity_per_unit: Decimal,
}

/// A BOM with its component lines
#[derive(Debug, Clone, Serialize)]
pub struct BomWithLines {
    #[serde(flatten)]
    pub bom: BillOfMaterials,
    pub lines: Vec<BomLine>,
}

/// A production order
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProductionOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub bom_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub quantity: Decimal,
    pub status: ProductionOrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input line for a new BOM
#[derive(Debug, Deserialize)]
pub struct BomLineInput {
    pub component_product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity_per_unit: Decimal,
}

/// Input for creating a BOM
#[derive(Debug, Deserialize)]
pub struct CreateBomInput {
    pub product_id: Uuid,
    pub name: String,
    pub lines: Vec<BomLineInput>,
}

/// Input for creating a production order
#[derive(Debug, Deserialize)]
pub struct CreateProductionOrderInput {
    pub bom_id: Uuid,
    pub location_id: Uuid,
    /// Units of the parent product to produce
    pub quantity: Decimal,
}

/// Component quantity consumed for an order quantity
pub fn scaled_consumption(quantity_per_unit: Decimal, order_quantity: Decimal) -> Decimal {
    quantity_per_unit * order_quantity
}

impl ManufacturingService {
    /// Create a new ManufacturingService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create an active BOM for a parent product
    pub async fn create_bom(&self, tenant_id: Uuid, input: CreateBomInput) -> AppResult<BomWithLines> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "BOM name is required"));
        }
        validate_lines_non_empty(input.lines.len())
            .map_err(|msg| AppError::validation("lines", msg))?;
        for line in &input.lines {
            validate_positive_quantity(line.quantity_per_unit)
                .map_err(|msg| AppError::validation("quantity_per_unit", msg))?;
            if line.component_product_id == input.product_id {
                return Err(AppError::validation(
                    "component_product_id",
                    "A product cannot be a component of its own BOM",
                ));
            }
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_product(&mut tx, tenant_id, input.product_id).await?;

        let bom = sqlx::query_as::<_, BillOfMaterials>(
            r#"
            INSERT INTO boms (tenant_id, product_id, name, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING id, tenant_id, product_id, name, is_active, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.product_id)
        .bind(input.name.trim())
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            catalog::ensure_product(&mut tx, tenant_id, line.component_product_id).await?;
            catalog::ensure_unit(&mut tx, tenant_id, line.unit_id).await?;

            let inserted = sqlx::query_as::<_, BomLine>(
                r#"
                INSERT INTO bom_lines (bom_id, component_product_id, unit_id, quantity_per_unit)
                VALUES ($1, $2, $3, $4)
                RETURNING id, bom_id, component_product_id, unit_id, quantity_per_unit
                "#,
            )
            .bind(bom.id)
            .bind(line.component_product_id)
            .bind(line.unit_id)
            .bind(line.quantity_per_unit)
            .fetch_one(&mut *tx)
            .await?;
            lines.push(inserted);
        }

        tx.commit().await?;

        Ok(BomWithLines { bom, lines })
    }

    /// Deactivate a BOM so new production orders cannot reference it
    pub async fn deactivate_bom(&self, tenant_id: Uuid, bom_id: Uuid) -> AppResult<BillOfMaterials> {
        let bom = sqlx::query_as::<_, BillOfMaterials>(
            r#"
            UPDATE boms
            SET is_active = FALSE, updated_at = now()
            WHERE id = $1 AND tenant_id = $2
            RETURNING id, tenant_id, product_id, name, is_active, created_at, updated_at
            "#,
        )
        .bind(bom_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("BOM {bom_id}")))?;

        Ok(bom)
    }

    /// Get a BOM with its lines
    pub async fn get_bom(&self, tenant_id: Uuid, bom_id: Uuid) -> AppResult<BomWithLines> {
        let bom = sqlx::query_as::<_, BillOfMaterials>(
            r#"
            SELECT id, tenant_id, product_id, name, is_active, created_at, updated_at
            FROM boms
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(bom_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("BOM {bom_id}")))?;

        let lines = sqlx::query_as::<_, BomLine>(
            r#"
            SELECT id, bom_id, component_product_id, unit_id, quantity_per_unit
            FROM bom_lines
            WHERE bom_id = $1
            ORDER BY id
            "#,
        )
        .bind(bom_id)
        .fetch_all(&self.db)
        .await?;

        Ok(BomWithLines { bom, lines })
    }

    /// List BOMs for a tenant
    pub async fn list_boms(&self, tenant_id: Uuid) -> AppResult<Vec<BillOfMaterials>> {
        let boms = sqlx::query_as::<_, BillOfMaterials>(
            r#"
            SELECT id, tenant_id, product_id, name, is_active, created_at, updated_at
            FROM boms
            WHERE tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(boms)
    }

    /// Plan a production order against an active BOM
    pub async fn create_production_order(
        &self,
        tenant_id: Uuid,
        input: CreateProductionOrderInput,
    ) -> AppResult<ProductionOrder> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| AppError::validation("quantity", msg))?;

        let mut tx = self.db.begin().await?;

        let bom = sqlx::query_as::<_, BillOfMaterials>(
            r#"
            SELECT id, tenant_id, product_id, name, is_active, created_at, updated_at
            FROM boms
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(input.bom_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("BOM {}", input.bom_id)))?;

        if !bom.is_active {
            return Err(AppError::InvalidState(format!(
                "BOM {} is inactive",
                bom.id
            )));
        }

        catalog::ensure_location(&mut tx, tenant_id, input.location_id).await?;

        let order = sqlx::query_as::<_, ProductionOrder>(
            r#"
            INSERT INTO production_orders (tenant_id, bom_id, product_id, location_id, quantity, status)
            VALUES ($1, $2, $3, $4, $5, 'planned')
            RETURNING id, tenant_id, bom_id, product_id, location_id, quantity, status,
                      created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(bom.id)
        .bind(bom.product_id)
        .bind(input.location_id)
        .bind(input.quantity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(order)
    }

    /// Complete a Planned production order
    ///
    /// Consumes `quantity_per_unit * order.quantity` of every component at
    /// the order's location, then yields `order.quantity` of the parent
    /// product in its default unit, all in one transaction. Completing a
    /// Cancelled or Completed order fails with `InvalidState`.
    pub async fn complete(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<ProductionOrder> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, ProductionOrder>(
            r#"
            SELECT id, tenant_id, bom_id, product_id, location_id, quantity, status,
                   created_at, updated_at
            FROM production_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Production order {order_id}")))?;

        if !order.status.can_complete() {
            return Err(AppError::InvalidState(format!(
                "production order {} is {}",
                order_id,
                order.status.as_str()
            )));
        }

        let lines = sqlx::query_as::<_, BomLine>(
            r#"
            SELECT id, bom_id, component_product_id, unit_id, quantity_per_unit
            FROM bom_lines
            WHERE bom_id = $1
            ORDER BY id
            "#,
        )
        .bind(order.bom_id)
        .fetch_all(&mut *tx)
        .await?;

        if lines.is_empty() {
            return Err(AppError::NotFound(format!(
                "BOM {} has no component lines",
                order.bom_id
            )));
        }

        // Consume components first, then yield the parent product.
        for line in &lines {
            let key = QuantKey {
                product_id: line.component_product_id,
                location_id: order.location_id,
                batch_id: None,
                unit_id: line.unit_id,
            };
            let to_consume = scaled_consumption(line.quantity_per_unit, order.quantity);
            apply_adjustment(
                &mut tx,
                tenant_id,
                &key,
                -to_consume,
                MovementType::ProductionConsume,
                Some(order_id),
            )
            .await?;
        }

        let parent = catalog::ensure_product(&mut tx, tenant_id, order.product_id).await?;
        let yield_key = QuantKey {
            product_id: parent.id,
            location_id: order.location_id,
            batch_id: None,
            unit_id: parent.default_unit_id,
        };
        apply_adjustment(
            &mut tx,
            tenant_id,
            &yield_key,
            order.quantity,
            MovementType::ProductionYield,
            Some(order_id),
        )
        .await?;

        let completed = sqlx::query_as::<_, ProductionOrder>(
            r#"
            UPDATE production_orders
            SET status = 'completed', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, bom_id, product_id, location_id, quantity, status,
                      created_at, updated_at
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        audit::record_event(
            &mut tx,
            tenant_id,
            AuditEventType::ProductionCompleted,
            order_id,
            serde_json::json!({
                "product_id": completed.product_id,
                "location_id": completed.location_id,
                "quantity": completed.quantity,
                "component_count": lines.len(),
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            order_id = %order_id,
            quantity = %completed.quantity,
            "production order completed"
        );

        Ok(completed)
    }

    /// Cancel a Planned production order
    pub async fn cancel(&self, tenant_id: Uuid, order_id: Uuid) -> AppResult<ProductionOrder> {
        let mut tx = self.db.begin().await?;

        let order = sqlx::query_as::<_, ProductionOrder>(
            r#"
            SELECT id, tenant_id, bom_id, product_id, location_id, quantity, status,
                   created_at, updated_at
            FROM production_orders
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Production order {order_id}")))?;

        if !order.status.can_complete() {
            return Err(AppError::InvalidState(format!(
                "production order {} is {}",
                order_id,
                order.status.as_str()
            )));
        }

        let cancelled = sqlx::query_as::<_, ProductionOrder>(
            r#"
            UPDATE production_orders
            SET status = 'cancelled', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, bom_id, product_id, location_id, quantity, status,
                      created_at, updated_at
            "#,
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(cancelled)
    }

    /// Get a production order
    pub async fn get_production_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> AppResult<ProductionOrder> {
        sqlx::query_as::<_, ProductionOrder>(
            r#"
            SELECT id, tenant_id, bom_id, product_id, location_id, quantity, status,
                   created_at, updated_at
            FROM production_orders
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(order_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Production order {order_id}")))
    }

    /// List production orders for a tenant
    pub async fn list_production_orders(&self, tenant_id: Uuid) -> AppResult<Vec<ProductionOrder>> {
        let orders = sqlx::query_as::<_, ProductionOrder>(
            r#"
            SELECT id, tenant_id, bom_id, product_id, location_id, quantity, status,
                   created_at, updated_at
            FROM production_orders
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(orders)
    }
}
