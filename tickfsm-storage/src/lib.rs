//! # tickfsm-storage
//!
//! Storage layer for tickfsm.
//!
//! This crate provides:
//! - Saving machines under a name as checksummed JSON snapshots
//! - Loading them back with tick bookkeeping intact
//! - Deleting and listing saved machines

pub mod error;
pub mod store;

pub use error::StorageError;
pub use store::{MachineStore, SaveMeta};
