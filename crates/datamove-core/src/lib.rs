//! Datamove Core - Domain model and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `TransferJob`, `TransferLocation`, `Attributes`, `JobCheckpoint`
//! - **Port definitions** - Traits for adapters: `IStorageClient`, `IJournalSink`,
//!   `IProgressSink`, `IOverwritePrompt`, `IMemoryProbe`
//! - **Configuration** - YAML-backed engine settings with validation
//!
//! # Architecture
//!
//! The domain module contains pure data and invariants with no I/O.
//! Ports define trait interfaces that adapter crates implement; the
//! transfer engine in `datamove-engine` orchestrates domain entities
//! through them.

pub mod config;
pub mod domain;
pub mod ports;
