//! Business logic services for the Stock Ledger Engine

pub mod audit;
pub mod catalog;
pub mod invoicing;
pub mod manufacturing;
pub mod procurement;
pub mod quants;
pub mod stocktake;
pub mod transfers;
pub mod units;

pub use audit::AuditService;
pub use catalog::CatalogService;
pub use invoicing::InvoicingService;
pub use manufacturing::ManufacturingService;
pub use procurement::ProcurementService;
pub use quants::QuantService;
pub use stocktake::StockTakeService;
pub use transfers::TransferService;
pub use units::UnitService;
