//! Quant store: the stock ledger proper
//!
//! One row per (tenant, product, location, batch-or-none, unit) tuple.
//! Every mutation goes through [`apply_adjustment`], a single guarded SQL
//! upsert executed against the `quantity >= 0` check constraint, so two
//! concurrent adjustments of the same tuple serialize on the row lock and
//! a decrement below zero aborts the enclosing transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::validate_positive_quantity;

use crate::error::{AppError, AppResult};
use crate::services::catalog;
use crate::services::units::load_unit_tree;

/// Quant service exposing the atomic adjust/read primitives
#[derive(Clone)]
pub struct QuantService {
    db: PgPool,
}

/// Why a quantity moved; stored on every journal row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Adjustment,
    Repack,
    Transfer,
    PurchaseReceipt,
    ProductionConsume,
    ProductionYield,
    Sale,
    InitialSeed,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Adjustment => "adjustment",
            MovementType::Repack => "repack",
            MovementType::Transfer => "transfer",
            MovementType::PurchaseReceipt => "purchase_receipt",
            MovementType::ProductionConsume => "production_consume",
            MovementType::ProductionYield => "production_yield",
            MovementType::Sale => "sale",
            MovementType::InitialSeed => "initial_seed",
        }
    }
}

/// A ledger row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Quant {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    /// `None` means unbatched stock
    pub batch_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Identity of a ledger tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantKey {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub unit_id: Uuid,
}

/// A journal row recording one signed delta against a tuple
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockMovement {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub quantity: Decimal,
    pub movement_type: MovementType,
    pub reference_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Input for a manual stock adjustment
#[derive(Debug, Deserialize)]
pub struct AdjustStockInput {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub unit_id: Uuid,
    /// Signed delta; negative values decrement
    pub delta: Decimal,
}

/// Input for a break-bulk (repack) operation
#[derive(Debug, Deserialize)]
pub struct BreakBulkInput {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub source_unit_id: Uuid,
    pub target_unit_id: Uuid,
    /// Quantity to debit from the source unit
    pub quantity: Decimal,
}

/// Result of a break-bulk operation
#[derive(Debug, Clone, Serialize)]
pub struct BreakBulkOutcome {
    pub source: Quant,
    pub target: Quant,
    pub factor: Decimal,
}

/// One entry of initial stock to seed for a tenant
#[derive(Debug, Deserialize)]
pub struct SeedStockEntry {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Aggregated on-hand quantity in native units
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Optional filters for the reporting aggregation
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StockLevelFilter {
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
}

/// Atomically read-or-create the tuple's row and add `delta` to it,
/// journaling the movement in the same transaction.
///
/// The upsert and the non-negativity check happen in one statement; a
/// violation surfaces as [`AppError::InsufficientStock`] and aborts the
/// caller's transaction, leaving the row untouched. A negative delta on an
/// absent row fails the same way (the implicit starting quantity is zero).
pub(crate) async fn apply_adjustment(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    key: &QuantKey,
    delta: Decimal,
    movement_type: MovementType,
    reference_id: Option<Uuid>,
) -> AppResult<Quant> {
    let quant = sqlx::query_as::<_, Quant>(
        r#"
        INSERT INTO quants (tenant_id, product_id, location_id, batch_id, unit_id, quantity)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT ON CONSTRAINT quants_tuple_unique
        DO UPDATE SET quantity = quants.quantity + EXCLUDED.quantity, updated_at = now()
        RETURNING id, tenant_id, product_id, location_id, batch_id, unit_id, quantity,
                  created_at, updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(key.product_id)
    .bind(key.location_id)
    .bind(key.batch_id)
    .bind(key.unit_id)
    .bind(delta)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_quantity_violation(e, key, delta))?;

    sqlx::query(
        r#"
        INSERT INTO stock_movements (tenant_id, product_id, location_id, batch_id, unit_id,
                                     quantity, movement_type, reference_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(tenant_id)
    .bind(key.product_id)
    .bind(key.location_id)
    .bind(key.batch_id)
    .bind(key.unit_id)
    .bind(delta)
    .bind(movement_type.as_str())
    .bind(reference_id)
    .execute(&mut **tx)
    .await?;

    Ok(quant)
}

/// Translate the check-constraint violation into the ledger's error
fn map_quantity_violation(err: sqlx::Error, key: &QuantKey, delta: Decimal) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some("quants_quantity_non_negative") {
            return AppError::InsufficientStock(format!(
                "product {} at location {} cannot absorb a delta of {}",
                key.product_id, key.location_id, delta
            ));
        }
    }
    AppError::DatabaseError(err)
}

impl QuantService {
    /// Create a new QuantService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Adjust stock for a tuple by a signed delta
    ///
    /// Used directly for manual corrections; composite operations call the
    /// same primitive inside their own transactions.
    pub async fn adjust(&self, tenant_id: Uuid, input: AdjustStockInput) -> AppResult<Quant> {
        if input.delta.is_zero() {
            return Err(AppError::validation("delta", "Delta must be non-zero"));
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_product(&mut tx, tenant_id, input.product_id).await?;
        catalog::ensure_location(&mut tx, tenant_id, input.location_id).await?;
        catalog::ensure_unit(&mut tx, tenant_id, input.unit_id).await?;

        let key = QuantKey {
            product_id: input.product_id,
            location_id: input.location_id,
            batch_id: input.batch_id,
            unit_id: input.unit_id,
        };
        let quant = apply_adjustment(
            &mut tx,
            tenant_id,
            &key,
            input.delta,
            MovementType::Adjustment,
            None,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            product_id = %input.product_id,
            delta = %input.delta,
            "stock adjusted"
        );

        Ok(quant)
    }

    /// Repack stock from one unit into another at the same tuple
    ///
    /// Debits `quantity` in the source unit and credits
    /// `quantity * factor` in the target unit; both writes share one
    /// transaction, so a repack can never debit without crediting.
    pub async fn break_bulk(
        &self,
        tenant_id: Uuid,
        input: BreakBulkInput,
    ) -> AppResult<BreakBulkOutcome> {
        validate_positive_quantity(input.quantity)
            .map_err(|msg| AppError::validation("quantity", msg))?;
        if input.source_unit_id == input.target_unit_id {
            return Err(AppError::validation(
                "target_unit_id",
                "Source and target units must differ",
            ));
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_product(&mut tx, tenant_id, input.product_id).await?;
        catalog::ensure_location(&mut tx, tenant_id, input.location_id).await?;

        let tree = load_unit_tree(&mut tx, tenant_id).await?;
        let factor = tree.conversion_factor(input.source_unit_id, input.target_unit_id)?;
        if factor <= Decimal::ZERO {
            return Err(AppError::InvalidConversion(format!(
                "conversion factor {factor} between units {} and {} is not positive",
                input.source_unit_id, input.target_unit_id
            )));
        }

        let repack_id = Uuid::new_v4();
        let source_key = QuantKey {
            product_id: input.product_id,
            location_id: input.location_id,
            batch_id: input.batch_id,
            unit_id: input.source_unit_id,
        };
        let target_key = QuantKey {
            unit_id: input.target_unit_id,
            ..source_key
        };

        let source = apply_adjustment(
            &mut tx,
            tenant_id,
            &source_key,
            -input.quantity,
            MovementType::Repack,
            Some(repack_id),
        )
        .await?;
        let target = apply_adjustment(
            &mut tx,
            tenant_id,
            &target_key,
            input.quantity * factor,
            MovementType::Repack,
            Some(repack_id),
        )
        .await?;

        tx.commit().await?;

        Ok(BreakBulkOutcome {
            source,
            target,
            factor,
        })
    }

    /// Seed initial stock for a tenant, creating rows only where the tuple
    /// does not already exist
    ///
    /// Idempotent by design: re-running a template seed never doubles
    /// quantities. Returns the number of tuples actually created.
    pub async fn seed_initial_stock(
        &self,
        tenant_id: Uuid,
        entries: Vec<SeedStockEntry>,
    ) -> AppResult<u64> {
        let mut tx = self.db.begin().await?;
        let mut created = 0u64;

        for entry in &entries {
            validate_positive_quantity(entry.quantity)
                .map_err(|msg| AppError::validation("quantity", msg))?;
            catalog::ensure_product(&mut tx, tenant_id, entry.product_id).await?;
            catalog::ensure_location(&mut tx, tenant_id, entry.location_id).await?;
            catalog::ensure_unit(&mut tx, tenant_id, entry.unit_id).await?;

            let inserted = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO quants (tenant_id, product_id, location_id, batch_id, unit_id, quantity)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT ON CONSTRAINT quants_tuple_unique DO NOTHING
                RETURNING id
                "#,
            )
            .bind(tenant_id)
            .bind(entry.product_id)
            .bind(entry.location_id)
            .bind(entry.batch_id)
            .bind(entry.unit_id)
            .bind(entry.quantity)
            .fetch_optional(&mut *tx)
            .await?;

            if inserted.is_some() {
                sqlx::query(
                    r#"
                    INSERT INTO stock_movements (tenant_id, product_id, location_id, batch_id,
                                                 unit_id, quantity, movement_type)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    "#,
                )
                .bind(tenant_id)
                .bind(entry.product_id)
                .bind(entry.location_id)
                .bind(entry.batch_id)
                .bind(entry.unit_id)
                .bind(entry.quantity)
                .bind(MovementType::InitialSeed.as_str())
                .execute(&mut *tx)
                .await?;
                created += 1;
            }
        }

        tx.commit().await?;

        tracing::info!(tenant_id = %tenant_id, created, "initial stock seeded");
        Ok(created)
    }

    /// Read a single tuple's row, if it exists
    pub async fn get_quant(&self, tenant_id: Uuid, key: &QuantKey) -> AppResult<Option<Quant>> {
        let quant = sqlx::query_as::<_, Quant>(
            r#"
            SELECT id, tenant_id, product_id, location_id, batch_id, unit_id, quantity,
                   created_at, updated_at
            FROM quants
            WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
              AND batch_id IS NOT DISTINCT FROM $4 AND unit_id = $5
            "#,
        )
        .bind(tenant_id)
        .bind(key.product_id)
        .bind(key.location_id)
        .bind(key.batch_id)
        .bind(key.unit_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(quant)
    }

    /// Read-only aggregation of on-hand stock, summed across batches,
    /// grouped by product, location and native unit
    pub async fn stock_levels(
        &self,
        tenant_id: Uuid,
        filter: StockLevelFilter,
    ) -> AppResult<Vec<StockLevel>> {
        let levels = sqlx::query_as::<_, StockLevel>(
            r#"
            SELECT product_id, location_id, unit_id, SUM(quantity) AS quantity
            FROM quants
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR product_id = $2)
              AND ($3::uuid IS NULL OR location_id = $3)
            GROUP BY product_id, location_id, unit_id
            ORDER BY product_id, location_id, unit_id
            "#,
        )
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.location_id)
        .fetch_all(&self.db)
        .await?;

        Ok(levels)
    }

    /// Movement journal for a product, most recent first
    pub async fn list_movements(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(
            r#"
            SELECT id, tenant_id, product_id, location_id, batch_id, unit_id, quantity,
                   movement_type, reference_id, created_at
            FROM stock_movements
            WHERE tenant_id = $1 AND product_id = $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_all(&self.db)
        .await?;

        Ok(movements)
    }
}
