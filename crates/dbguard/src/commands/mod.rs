//! Commands module for the dbguard CLI
//!
//! Each command takes its options and a configured coordinator; all database
//! access goes through the coordinator.

pub mod exec;
pub mod query;
pub mod status;
pub mod write_rows;
