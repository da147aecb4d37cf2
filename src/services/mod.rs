//! Drum ledger services.
//!
//! Leaves first: `wastage` is pure, `drum_registry`, `usage_ledger`,
//! `history` and `monthly_usage` are stores that run inside a caller's
//! unit of work, and `consumption` is the coordinator that owns every
//! quantity write.

pub mod consumption;
pub mod drum_registry;
pub mod history;
pub mod locks;
pub mod monthly_usage;
pub mod usage_ledger;
pub mod wastage;
