//! Unit-of-measure management
//!
//! Persists the tenant's unit forest and answers conversion queries by
//! loading it into a [`shared::UnitTree`]. The ratio convention is
//! documented on [`shared::Unit`]: 1 of a unit equals `ratio` of its
//! parent; callers must stay consistent about which side is the divisor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use shared::{validate_unit_ratio, Unit, UnitTree};

use crate::error::{AppError, AppResult};

/// Unit service for managing measurement units and conversions
#[derive(Clone)]
pub struct UnitService {
    db: PgPool,
}

/// Database row for a unit
#[derive(Debug, sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    category: String,
    ratio: Decimal,
    base_unit_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UnitRow> for UnitRecord {
    fn from(row: UnitRow) -> Self {
        UnitRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            category: row.category,
            ratio: row.ratio,
            base_unit_id: row.base_unit_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A persisted unit of measure
#[derive(Debug, Clone, Serialize)]
pub struct UnitRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub category: String,
    pub ratio: Decimal,
    pub base_unit_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a unit
#[derive(Debug, Deserialize)]
pub struct CreateUnitInput {
    pub name: String,
    /// Free-form grouping, e.g. "Weight", "Volume", "Time"
    pub category: String,
    /// Required for non-root units; defaults to 1 on roots
    pub ratio: Option<Decimal>,
    pub base_unit_id: Option<Uuid>,
}

/// Load a tenant's complete unit forest inside the caller's transaction
pub(crate) async fn load_unit_tree(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
) -> AppResult<UnitTree> {
    let rows = sqlx::query_as::<_, UnitRow>(
        r#"
        SELECT id, tenant_id, name, category, ratio, base_unit_id, created_at, updated_at
        FROM units
        WHERE tenant_id = $1
        "#,
    )
    .bind(tenant_id)
    .fetch_all(&mut **tx)
    .await?;

    Ok(UnitTree::new(rows.into_iter().map(|row| Unit {
        id: row.id,
        tenant_id: row.tenant_id,
        name: row.name,
        category: row.category,
        ratio: row.ratio,
        base_unit_id: row.base_unit_id,
    })))
}

impl UnitService {
    /// Create a new UnitService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a unit, optionally parented to an existing unit of the same
    /// tenant
    pub async fn create_unit(
        &self,
        tenant_id: Uuid,
        input: CreateUnitInput,
    ) -> AppResult<UnitRecord> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "Unit name is required"));
        }

        let ratio = input.ratio.unwrap_or(Decimal::ONE);
        validate_unit_ratio(ratio).map_err(|msg| AppError::validation("ratio", msg))?;

        let mut tx = self.db.begin().await?;

        if let Some(base_unit_id) = input.base_unit_id {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM units WHERE id = $1 AND tenant_id = $2)",
            )
            .bind(base_unit_id)
            .bind(tenant_id)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                return Err(AppError::NotFound(format!("Unit {base_unit_id}")));
            }
        }

        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            INSERT INTO units (tenant_id, name, category, ratio, base_unit_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, tenant_id, name, category, ratio, base_unit_id, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.name.trim())
        .bind(input.category.trim())
        .bind(ratio)
        .bind(input.base_unit_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    /// Get a unit by id
    pub async fn get_unit(&self, tenant_id: Uuid, unit_id: Uuid) -> AppResult<UnitRecord> {
        let row = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, tenant_id, name, category, ratio, base_unit_id, created_at, updated_at
            FROM units
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(unit_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Unit {unit_id}")))?;

        Ok(row.into())
    }

    /// List all units for a tenant
    pub async fn list_units(&self, tenant_id: Uuid) -> AppResult<Vec<UnitRecord>> {
        let rows = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, tenant_id, name, category, ratio, base_unit_id, created_at, updated_at
            FROM units
            WHERE tenant_id = $1
            ORDER BY category, name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    /// Factor `f` such that `source_qty * f = target_qty`
    ///
    /// Fails with `IncompatibleUnits` when the units do not share a root;
    /// this is a caller configuration error and is not retried.
    pub async fn conversion_factor(
        &self,
        tenant_id: Uuid,
        source_unit_id: Uuid,
        target_unit_id: Uuid,
    ) -> AppResult<Decimal> {
        let mut tx = self.db.begin().await?;
        let tree = load_unit_tree(&mut tx, tenant_id).await?;
        tx.commit().await?;

        Ok(tree.conversion_factor(source_unit_id, target_unit_id)?)
    }

    /// Convert a quantity between two units of the same tenant
    pub async fn convert(
        &self,
        tenant_id: Uuid,
        quantity: Decimal,
        source_unit_id: Uuid,
        target_unit_id: Uuid,
    ) -> AppResult<Decimal> {
        let factor = self
            .conversion_factor(tenant_id, source_unit_id, target_unit_id)
            .await?;
        Ok(quantity * factor)
    }
}
