pub mod drum;
pub mod drum_history;
pub mod drum_usage;
pub mod item;
pub mod monthly_usage_summary;
