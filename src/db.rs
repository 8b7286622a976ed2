pub mod interval_usage_archive;
pub mod readings;
