//! Stock transfers between storage locations
//!
//! A transfer is drafted without ledger effect; posting performs one
//! paired decrement/increment per line inside a single transaction. If any
//! line lacks stock the whole posting rolls back and the transfer stays
//! Draft.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use shared::{validate_lines_non_empty, validate_positive_quantity, validate_transfer_endpoints};

use crate::error::{AppError, AppResult};
use crate::services::audit::{self, AuditEventType};
use crate::services::catalog;
use crate::services::quants::{apply_adjustment, MovementType, QuantKey};

/// Transfer service for paired two-location moves
#[derive(Clone)]
pub struct TransferService {
    db: PgPool,
}

/// Lifecycle of a transfer; Posted and Cancelled are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Draft,
    Posted,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Draft => "draft",
            TransferStatus::Posted => "posted",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TransferStatus::Draft),
            "posted" => Some(TransferStatus::Posted),
            "cancelled" => Some(TransferStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Draft)
    }
}

/// A stock transfer header
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StockTransfer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A transfer line
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TransferLine {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// A transfer with its lines
#[derive(Debug, Clone, Serialize)]
pub struct TransferWithLines {
    #[serde(flatten)]
    pub transfer: StockTransfer,
    pub lines: Vec<TransferLine>,
}

/// Input line for a new transfer
#[derive(Debug, Deserialize)]
pub struct TransferLineInput {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub quantity: Decimal,
}

/// Input for creating a transfer
#[derive(Debug, Deserialize)]
pub struct CreateTransferInput {
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub lines: Vec<TransferLineInput>,
}

impl TransferService {
    /// Create a new TransferService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a transfer in Draft status; no ledger effect yet
    pub async fn create_transfer(
        &self,
        tenant_id: Uuid,
        input: CreateTransferInput,
    ) -> AppResult<TransferWithLines> {
        validate_transfer_endpoints(input.from_location_id, input.to_location_id)
            .map_err(|msg| AppError::validation("to_location_id", msg))?;
        validate_lines_non_empty(input.lines.len())
            .map_err(|msg| AppError::validation("lines", msg))?;
        for line in &input.lines {
            validate_positive_quantity(line.quantity)
                .map_err(|msg| AppError::validation("quantity", msg))?;
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_location(&mut tx, tenant_id, input.from_location_id).await?;
        catalog::ensure_location(&mut tx, tenant_id, input.to_location_id).await?;

        let transfer = sqlx::query_as::<_, StockTransfer>(
            r#"
            INSERT INTO stock_transfers (tenant_id, from_location_id, to_location_id, status)
            VALUES ($1, $2, $3, 'draft')
            RETURNING id, tenant_id, from_location_id, to_location_id, status,
                      created_at, updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(input.from_location_id)
        .bind(input.to_location_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = Vec::with_capacity(input.lines.len());
        for line in &input.lines {
            catalog::ensure_product(&mut tx, tenant_id, line.product_id).await?;
            catalog::ensure_unit(&mut tx, tenant_id, line.unit_id).await?;

            let inserted = sqlx::query_as::<_, TransferLine>(
                r#"
                INSERT INTO stock_transfer_lines (transfer_id, product_id, unit_id, quantity)
                VALUES ($1, $2, $3, $4)
                RETURNING id, transfer_id, product_id, unit_id, quantity
                "#,
            )
            .bind(transfer.id)
            .bind(line.product_id)
            .bind(line.unit_id)
            .bind(line.quantity)
            .fetch_one(&mut *tx)
            .await?;
            lines.push(inserted);
        }

        tx.commit().await?;

        Ok(TransferWithLines { transfer, lines })
    }

    /// Post a Draft transfer: one paired decrement/increment per line, all
    /// within one transaction
    ///
    /// On any line's insufficiency the entire posting rolls back and the
    /// transfer remains Draft. Posting a Posted or Cancelled transfer fails
    /// with `InvalidState`.
    pub async fn post_transfer(
        &self,
        tenant_id: Uuid,
        transfer_id: Uuid,
    ) -> AppResult<TransferWithLines> {
        let mut tx = self.db.begin().await?;

        let transfer = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT id, tenant_id, from_location_id, to_location_id, status,
                   created_at, updated_at
            FROM stock_transfers
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(transfer_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transfer {transfer_id}")))?;

        if transfer.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "transfer {} is already {}",
                transfer_id,
                transfer.status.as_str()
            )));
        }

        let lines = self.load_lines(&mut tx, transfer_id).await?;

        for line in &lines {
            let from_key = QuantKey {
                product_id: line.product_id,
                location_id: transfer.from_location_id,
                batch_id: None,
                unit_id: line.unit_id,
            };
            let to_key = QuantKey {
                location_id: transfer.to_location_id,
                ..from_key
            };

            apply_adjustment(
                &mut tx,
                tenant_id,
                &from_key,
                -line.quantity,
                MovementType::Transfer,
                Some(transfer_id),
            )
            .await?;
            apply_adjustment(
                &mut tx,
                tenant_id,
                &to_key,
                line.quantity,
                MovementType::Transfer,
                Some(transfer_id),
            )
            .await?;
        }

        let posted = sqlx::query_as::<_, StockTransfer>(
            r#"
            UPDATE stock_transfers
            SET status = 'posted', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, from_location_id, to_location_id, status,
                      created_at, updated_at
            "#,
        )
        .bind(transfer_id)
        .fetch_one(&mut *tx)
        .await?;

        audit::record_event(
            &mut tx,
            tenant_id,
            AuditEventType::TransferPosted,
            transfer_id,
            serde_json::json!({
                "from_location_id": posted.from_location_id,
                "to_location_id": posted.to_location_id,
                "line_count": lines.len(),
            }),
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            transfer_id = %transfer_id,
            lines = lines.len(),
            "transfer posted"
        );

        Ok(TransferWithLines {
            transfer: posted,
            lines,
        })
    }

    /// Cancel a Draft transfer
    pub async fn cancel_transfer(
        &self,
        tenant_id: Uuid,
        transfer_id: Uuid,
    ) -> AppResult<StockTransfer> {
        let mut tx = self.db.begin().await?;

        let transfer = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT id, tenant_id, from_location_id, to_location_id, status,
                   created_at, updated_at
            FROM stock_transfers
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(transfer_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transfer {transfer_id}")))?;

        if transfer.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "transfer {} is already {}",
                transfer_id,
                transfer.status.as_str()
            )));
        }

        let cancelled = sqlx::query_as::<_, StockTransfer>(
            r#"
            UPDATE stock_transfers
            SET status = 'cancelled', updated_at = now()
            WHERE id = $1
            RETURNING id, tenant_id, from_location_id, to_location_id, status,
                      created_at, updated_at
            "#,
        )
        .bind(transfer_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(cancelled)
    }

    /// Get a transfer with its lines
    pub async fn get_transfer(
        &self,
        tenant_id: Uuid,
        transfer_id: Uuid,
    ) -> AppResult<TransferWithLines> {
        let transfer = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT id, tenant_id, from_location_id, to_location_id, status,
                   created_at, updated_at
            FROM stock_transfers
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(transfer_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Transfer {transfer_id}")))?;

        let lines = sqlx::query_as::<_, TransferLine>(
            r#"
            SELECT id, transfer_id, product_id, unit_id, quantity
            FROM stock_transfer_lines
            WHERE transfer_id = $1
            ORDER BY id
            "#,
        )
        .bind(transfer_id)
        .fetch_all(&self.db)
        .await?;

        Ok(TransferWithLines { transfer, lines })
    }

    /// List all transfers for a tenant
    pub async fn list_transfers(&self, tenant_id: Uuid) -> AppResult<Vec<StockTransfer>> {
        let transfers = sqlx::query_as::<_, StockTransfer>(
            r#"
            SELECT id, tenant_id, from_location_id, to_location_id, status,
                   created_at, updated_at
            FROM stock_transfers
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.db)
        .await?;

        Ok(transfers)
    }

    async fn load_lines(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        transfer_id: Uuid,
    ) -> AppResult<Vec<TransferLine>> {
        let lines = sqlx::query_as::<_, TransferLine>(
            r#"
            SELECT id, transfer_id, product_id, unit_id, quantity
            FROM stock_transfer_lines
            WHERE transfer_id = $1
            ORDER BY id
            "#,
        )
        .bind(transfer_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(lines)
    }
}
