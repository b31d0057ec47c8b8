//! dbguard - run SQL against a single-writer database file, one process at a time.
//!
//! Every subcommand goes through [`dbguard_core::Coordinator`], so any number of
//! `dbguard` processes can point at the same file without corrupting it.

pub mod cli;
pub mod commands;
