//! Shared types and pure domain logic for the Stock Ledger Engine
//!
//! This crate contains the unit-of-measure conversion tree and validation
//! helpers shared between the ledger services and other consumers of the
//! platform. It performs no I/O.

pub mod units;
pub mod validation;

pub use units::*;
pub use validation::*;
