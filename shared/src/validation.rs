//! Validation utilities for the Stock Ledger Engine
//!
//! Pure checks shared by the ledger services; services wrap the returned
//! messages into their own error types.

use rust_decimal::Decimal;
use uuid::Uuid;

/// Validate that a movement or line quantity is strictly positive
pub fn validate_positive_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a unit's ratio to its parent
pub fn validate_unit_ratio(ratio: Decimal) -> Result<(), &'static str> {
    if ratio <= Decimal::ZERO {
        return Err("Unit ratio must be positive");
    }
    Ok(())
}

/// Validate that a transfer's endpoints are distinct locations
pub fn validate_transfer_endpoints(from: Uuid, to: Uuid) -> Result<(), &'static str> {
    if from == to {
        return Err("Source and destination locations must differ");
    }
    Ok(())
}

/// Validate that a document carries at least one line
pub fn validate_lines_non_empty(line_count: usize) -> Result<(), &'static str> {
    if line_count == 0 {
        return Err("At least one line is required");
    }
    Ok(())
}
