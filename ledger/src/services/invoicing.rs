//! Stock decrement for invoice posting
//!
//! Invoicing itself (numbering, pricing, tax, payment) lives outside the
//! ledger; when an invoice transitions Draft to Posted its stock effect is
//! applied here. If any line lacks stock the whole decrement fails and the
//! caller must not mark the invoice Posted.

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use shared::{validate_lines_non_empty, validate_positive_quantity};

use crate::error::{AppError, AppResult};
use crate::services::catalog;
use crate::services::quants::{apply_adjustment, MovementType, Quant, QuantKey};

/// Invoicing-facing facade over the quant store
#[derive(Clone)]
pub struct InvoicingService {
    db: PgPool,
}

/// One invoice line's stock effect
#[derive(Debug, Deserialize)]
pub struct InvoiceStockLine {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub quantity: Decimal,
}

impl InvoicingService {
    /// Create a new InvoicingService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Decrement stock for every line of a posting invoice
    ///
    /// All lines share one transaction: the first `InsufficientStock`
    /// rolls back every previous line's decrement.
    pub async fn post_invoice_lines(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        location_id: Uuid,
        lines: Vec<InvoiceStockLine>,
    ) -> AppResult<Vec<Quant>> {
        validate_lines_non_empty(lines.len()).map_err(|msg| AppError::validation("lines", msg))?;
        for line in &lines {
            validate_positive_quantity(line.quantity)
                .map_err(|msg| AppError::validation("quantity", msg))?;
        }

        let mut tx = self.db.begin().await?;

        catalog::ensure_location(&mut tx, tenant_id, location_id).await?;

        let mut quants = Vec::with_capacity(lines.len());
        for line in &lines {
            catalog::ensure_product(&mut tx, tenant_id, line.product_id).await?;
            catalog::ensure_unit(&mut tx, tenant_id, line.unit_id).await?;

            let key = QuantKey {
                product_id: line.product_id,
                location_id,
                batch_id: line.batch_id,
                unit_id: line.unit_id,
            };
            let quant = apply_adjustment(
                &mut tx,
                tenant_id,
                &key,
                -line.quantity,
                MovementType::Sale,
                Some(invoice_id),
            )
            .await?;
            quants.push(quant);
        }

        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            lines = quants.len(),
            "invoice stock decremented"
        );

        Ok(quants)
    }
}
