//! Opower hosts the usage data for PG&E and other utilities.

pub mod client;
pub mod usage_export;
