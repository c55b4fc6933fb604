//! Stock Ledger & Unit-of-Measure Conversion Engine
//!
//! Tracks quantity on hand per tenant, product, storage location and
//! optional batch, in arbitrary units of measure, and exposes the atomic
//! movement primitives every other module (sales, purchasing,
//! manufacturing, transfers, stock counts) uses to mutate that ledger.
//!
//! All mutations run inside a single tenant-scoped database transaction
//! per logical operation: they either fully apply or have no effect.

pub mod config;
pub mod error;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
