//! groupsync CLI library
//!
//! Command implementations, the sync config file format and the file-backed
//! group store. The binary entry point lives in main.rs.

pub mod commands;
pub mod config;
pub mod error;
pub mod output;
pub mod store;
