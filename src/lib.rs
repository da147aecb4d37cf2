//! Drum Ledger Library
//!
//! Tracks cable drum stock as technicians consume cable against
//! installation lines. Every quantity change is paired with a history row,
//! superseded usage is reversed before new usage is applied, and a drum can
//! be recalculated from its usage ledger at any time.
//!
//! The entry point is [`services::consumption::ConsumptionCoordinator`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use errors::ServiceError;
pub use services::consumption::{ConsumptionCoordinator, LedgerPolicy, SyncUsage, UsageOutcome};
pub use services::wastage::UsageMeasurement;
