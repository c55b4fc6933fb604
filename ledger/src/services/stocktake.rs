//! Blind stock counts and reconciliation
//!
//! Expected quantities are computed once at creation, normalized to each
//! product's default unit through the unit tree, and frozen; later ledger
//! movements never change what a counter is being checked against. The
//! counter-facing view omits expected quantity and variance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::audit::{self, AuditEventType};
use crate::services::catalog;
use crate::services::units::load_unit_tree;

/// Stock take service for blind counts
#[derive(Clone)]
pub struct StockTakeService {
    db: PgPool,
}

/// Who is looking at a stock take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StocktakeRole {
    /// The person counting; must not see expected values
    Counter,
    /// Management; sees everything
    Manager,
}

/// Lifecycle of a stock take; Completed is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StockTakeStatus {
    Open,
    Completed,
}

impl StockTakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockTakeStatus::Open => "open",
            StockTakeStatus::Completed => "completed",
        }
    }
}

/// Lifecycle of one item within a take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StockTakeItemStatus {
    Pending,
    Counted,
}

impl StockTakeItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockTakeItemStatus::Pending => "pending",
            StockTakeItemStatus::Counted => "counted",
        }
    }
}

/// A stock take header
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockTake {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub location_id: Uuid,
    pub status: StockTakeStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One product's line within a take; expected is a frozen snapshot
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockTakeItem {
    pub id: Uuid,
    pub stock_take_id: Uuid,
    pub product_id: Uuid,
    /// Reporting unit the expected quantity was normalized to
    pub unit_id: Uuid,
    pub expected_quantity: Decimal,
    pub counted_quantity: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub status: StockTakeItemStatus,
    pub counted_by: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
}

/// Role-gated projection of an item
///
/// For a Counter, `expected_quantity` and `variance` are withheld: the
/// blind-count property.
#[derive(Debug, Clone, Serialize)]
pub struct StockTakeItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub status: StockTakeItemStatus,
    pub counted_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<Decimal>,
}

impl StockTakeItemView {
    pub fn from_item(item: &StockTakeItem, role: StocktakeRole) -> Self {
        let (expected_quantity, variance) = match role {
            StocktakeRole::Counter => (None, None),
            StocktakeRole::Manager => (Some(item.expected_quantity), item.variance),
        };
        StockTakeItemView {
            id: item.id,
            product_id: item.product_id,
            unit_id: item.unit_id,
            status: item.status,
            counted_quantity: item.counted_quantity,
            expected_quantity,
            variance,
        }
    }
}

/// A take with role-gated items
#[derive(Debug, Clone, Serialize)]
pub struct StockTakeView {
    #[serde(flatten)]
    pub take: StockTake,
    pub items: Vec<StockTakeItemView>,
}

/// Input for creating a blind count
#[derive(Debug, Deserialize)]
pub struct CreateBlindCountInput {
    pub location_id: Uuid,
    pub product_ids: Vec<Uuid>,
    pub created_by: Uuid,
}

/// Signed difference between what was counted and what the ledger expected
pub fn variance(counted: Decimal, expected: Decimal) -> Decimal {
    counted - expected
}

/// Row used while locking an item together with its take
#[derive(Debug, sqlx::FromRow)]
struct ItemLockRow {
    id: Uuid,
    stock_take_id: Uuid,
    product_id: Uuid,
    expected_quantity: Decimal,
    status: StockTakeItemStatus,
    take_status: StockTakeStatus,
}

/// Row for summing a product's quants at a location
#[derive(Debug, sqlx::FromRow)]
struct QuantSliceRow {
    unit_id: Uuid,
    quantity: Decimal,
}

impl StockTakeService {
    /// Create a new StockTakeService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Open a blind count for a set of products at one location
    ///
    /// Expected quantities are summed across batches and units, converted
    /// to each product's default unit, and stored as a frozen snapshot.
    pub async fn create_blind_count(
        &self,
        tenant_id: Uuid,
        input: CreateBlindCountInput,
    ) -> AppResult<StockTakeView> {
        if input.product_ids.is_empty() {
            return Err(AppError::validation(
                "product_ids",
                "At least one product is required",
            ));
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_location(&mut tx, tenant_id, input.location_id).await?;
        let tree = load_unit_tree(&mut tx, tenant_id).await?;

        let take = sqlx::query_as::<_, StockTake>(
            r#"
            INSERT INTO stock_takes (tenant_id, location_id, status, created_by)
            VALUES ($1, $2, 'open', $3)
            RETURNING id, tenant_id, location_id, status, created_by, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.location_id)
        .bind(input.created_by)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(input.product_ids.len());
        for product_id in &input.product_ids {
            let product = catalog::ensure_product(&mut tx, tenant_id, *product_id).await?;

            let slices = sqlx::query_as::<_, QuantSliceRow>(
                r#"
                SELECT unit_id, quantity
                FROM quants
                WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
                "#,
            )
            .bind(tenant_id)
            .bind(product_id)
            .bind(input.location_id)
            .fetch_all(&mut *tx)
            .await?;

            let mut expected = Decimal::ZERO;
            for slice in &slices {
                expected += tree.convert(slice.quantity, slice.unit_id, product.default_unit_id)?;
            }

            let item = sqlx::query_as::<_, StockTakeItem>(
                r#"
                INSERT INTO stock_take_items (stock_take_id, product_id, unit_id,
                                              expected_quantity, status)
                VALUES ($1, $2, $3, $4, 'pending')
                RETURNING id, stock_take_id, product_id, unit_id, expected_quantity,
                          counted_quantity, variance, status, counted_by, counted_at
                "#,
            )
            .bind(take.id)
            .bind(product_id)
            .bind(product.default_unit_id)
            .bind(expected)
            .fetch_one(&mut *tx)
            .await?;
            items.push(item);
        }

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            stock_take_id = %take.id,
            items = items.len(),
            "blind count opened"
        );

        // The creator is management-side; return the full view.
        Ok(StockTakeView {
            take,
            items: items
                .iter()
                .map(|i| StockTakeItemView::from_item(i, StocktakeRole::Manager))
                .collect(),
        })
    }

    /// Submit a counted quantity for a pending item
    ///
    /// Computes the signed variance against the frozen expected value,
    /// emits a variance audit event when it is non-zero, and completes the
    /// take once no Pending items remain. The returned view is projected
    /// for the submitter's role, so a Counter never learns the expected
    /// value or the variance they just produced.
    pub async fn submit_count(
        &self,
        tenant_id: Uuid,
        item_id: Uuid,
        counted_quantity: Decimal,
        counted_by: Uuid,
        role: StocktakeRole,
    ) -> AppResult<StockTakeItemView> {
        if counted_quantity < Decimal::ZERO {
            return Err(AppError::validation(
                "counted_quantity",
                "Counted quantity cannot be negative",
            ));
        }

        let mut tx = self.db.begin().await?;

        // Locking the take header serializes concurrent submits against
        // the same take, so the last two items cannot both miss the
        // auto-complete below.
        let locked = sqlx::query_as::<_, ItemLockRow>(
            r#"
            SELECT i.id, i.stock_take_id, i.product_id, i.expected_quantity, i.status,
                   t.status AS take_status
            FROM stock_take_items i
            JOIN stock_takes t ON t.id = i.stock_take_id
            WHERE i.id = $1 AND t.tenant_id = $2
            FOR UPDATE OF i, t
            "#,
        )
        .bind(item_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Stock take item {item_id}")))?;

        if locked.take_status != StockTakeStatus::Open {
            return Err(AppError::InvalidState(format!(
                "stock take {} is already completed",
                locked.stock_take_id
            )));
        }
        if locked.status != StockTakeItemStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "stock take item {item_id} was already counted"
            )));
        }

        let item_variance = variance(counted_quantity, locked.expected_quantity);

        let item = sqlx::query_as::<_, StockTakeItem>(
            r#"
            UPDATE stock_take_items
            SET counted_quantity = $1, variance = $2, status = 'counted',
                counted_by = $3, counted_at = now()
            WHERE id = $4
            RETURNING id, stock_take_id, product_id, unit_id, expected_quantity,
                      counted_quantity, variance, status, counted_by, counted_at
            "#,
        )
        .bind(counted_quantity)
        .bind(item_variance)
        .bind(counted_by)
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await?;

        if !item_variance.is_zero() {
            audit::record_event(
                &mut tx,
                tenant_id,
                AuditEventType::CountVariance,
                locked.stock_take_id,
                serde_json::json!({
                    "item_id": item_id,
                    "product_id": locked.product_id,
                    "expected": locked.expected_quantity,
                    "counted": counted_quantity,
                    "variance": item_variance,
                }),
            )
            .await?;
        }

        let pending = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stock_take_items WHERE stock_take_id = $1 AND status = 'pending'",
        )
        .bind(locked.stock_take_id)
        .fetch_one(&mut *tx)
        .await?;

        if pending == 0 {
            sqlx::query(
                "UPDATE stock_takes SET status = 'completed', updated_at = now() WHERE id = $1",
            )
            .bind(locked.stock_take_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !item_variance.is_zero() {
            tracing::warn!(
                tenant_id = %tenant_id,
                item_id = %item_id,
                variance = %item_variance,
                "count variance detected"
            );
        }

        Ok(StockTakeItemView::from_item(&item, role))
    }

    /// Read a take with items projected for the caller's role
    pub async fn get_for_user(
        &self,
        tenant_id: Uuid,
        stock_take_id: Uuid,
        role: StocktakeRole,
    ) -> AppResult<StockTakeView> {
        let take = sqlx::query_as::<_, StockTake>(
            r#"
            SELECT id, tenant_id, location_id, status, created_by, created_at, updated_at
            FROM stock_takes
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(stock_take_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Stock take {stock_take_id}")))?;

        let items = sqlx::query_as::<_, StockTakeItem>(
            r#"
            SELECT id, stock_take_id, product_id, unit_id, expected_quantity,
                   counted_quantity, variance, status, counted_by, counted_at
            FROM stock_take_items
            WHERE stock_take_id = $1
            ORDER BY id
            "#,
        )
        .bind(stock_take_id)
        .fetch_all(&self.db)
        .await?;

        Ok(StockTakeView {
            take,
            items: items
                .iter()
                .map(|i| StockTakeItemView::from_item(i, role))
                .collect(),
        })
    }

    /// List all takes for a tenant
    pub async fn list_takes(&self, tenant_id: Uuid) -> AppResult<Vec<StockTake>> {
        let takes = sqlx::query_as::<_, StockTake>(
            r#"
            SELECT id, tenant_id, location_id, status, created_by, created_at, updated_at
            FROM stock_takes
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(takes)
    }
}
