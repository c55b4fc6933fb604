//! Product and location catalog
//!
//! The ledger needs products and storage locations only as identities: a
//! product carries a default unit for yields and reporting, a location is
//! an opaque place stock can sit. Batches are plain identifiers and have
//! no table of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Catalog service for products and locations
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

/// A product in the tenant's catalog
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub sku: Option<String>,
    pub default_unit_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A storage location
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Location {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a product
#[derive(Debug, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub sku: Option<String>,
    pub default_unit_id: Uuid,
}

/// Input for creating a location
#[derive(Debug, Deserialize)]
pub struct CreateLocationInput {
    pub name: String,
}

/// Minimal product projection used inside composite operations
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub(crate) struct ProductRef {
    pub id: Uuid,
    pub default_unit_id: Uuid,
}

/// Resolve a product for the tenant or fail with `NotFound`
pub(crate) async fn ensure_product(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    product_id: Uuid,
) -> AppResult<ProductRef> {
    sqlx::query_as::<_, ProductRef>(
        "SELECT id, default_unit_id FROM products WHERE id = $1 AND tenant_id = $2",
    )
    .bind(product_id)
    .bind(tenant_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Product {product_id}")))
}

/// Resolve a location for the tenant or fail with `NotFound`
pub(crate) async fn ensure_location(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    location_id: Uuid,
) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM locations WHERE id = $1 AND tenant_id = $2)",
    )
    .bind(location_id)
    .bind(tenant_id)
    .fetch_one(&mut **tx)
    .await?;

    if !exists {
        return Err(AppError::NotFound(format!("Location {location_id}")));
    }
    Ok(())
}

/// Resolve a unit for the tenant or fail with `NotFound`
pub(crate) async fn ensure_unit(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    unit_id: Uuid,
) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM units WHERE id = $1 AND tenant_id = $2)",
    )
    .bind(unit_id)
    .bind(tenant_id)
    .fetch_one(&mut **tx)
    .await?;

    if !exists {
        return Err(AppError::NotFound(format!("Unit {unit_id}")));
    }
    Ok(())
}

impl CatalogService {
    /// Create a new CatalogService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a product in the tenant's catalog
    pub async fn create_product(
        &self,
        tenant_id: Uuid,
        input: CreateProductInput,
    ) -> AppResult<Product> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "Product name is required"));
        }

        let mut tx = self.db.begin().await?;

        ensure_unit(&mut tx, tenant_id, input.default_unit_id).await?;

        let product = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (tenant_id, name, sku, default_unit_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, tenant_id, name, sku, default_unit_id, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.name.trim())
        .bind(&input.sku)
        .bind(input.default_unit_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(product)
    }

    /// Get a product by id
    pub async fn get_product(&self, tenant_id: Uuid, product_id: Uuid) -> AppResult<Product> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT id, tenant_id, name, sku, default_unit_id, created_at, updated_at
            FROM products
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(product_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Product {product_id}")))
    }

    /// List all products for a tenant
    pub async fn list_products(&self, tenant_id: Uuid) -> AppResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, tenant_id, name, sku, default_unit_id, created_at, updated_at
            FROM products
            WHERE tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(products)
    }

    /// Create a storage location
    pub async fn create_location(
        &self,
        tenant_id: Uuid,
        input: CreateLocationInput,
    ) -> AppResult<Location> {
        if input.name.trim().is_empty() {
            return Err(AppError::validation("name", "Location name is required"));
        }

        let location = sqlx::query_as::<_, Location>(
            r#"
            INSERT INTO locations (tenant_id, name)
            VALUES ($1, $2)
            RETURNING id, tenant_id, name, created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.name.trim())
        .fetch_one(&self.db)
        .await?;

        Ok(location)
    }

    /// Get a location by id
    pub async fn get_location(&self, tenant_id: Uuid, location_id: Uuid) -> AppResult<Location> {
        sqlx::query_as::<_, Location>(
            r#"
            SELECT id, tenant_id, name, created_at, updated_at
            FROM locations
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(location_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Location {location_id}")))
    }

    /// List all locations for a tenant
    pub async fn list_locations(&self, tenant_id: Uuid) -> AppResult<Vec<Location>> {
        let locations = sqlx::query_as::<_, Location>(
            r#"
            SELECT id, tenant_id, name, created_at, updated_at
            FROM locations
            WHERE tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(locations)
    }
}
