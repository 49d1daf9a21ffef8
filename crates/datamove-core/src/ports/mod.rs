//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the transfer engine
//! depends on, but whose implementations live in adapter crates or in
//! the embedding application.
//!
//! ## Ports Overview
//!
//! - [`IStorageClient`] - Attribute fetch, ranged I/O, creation, metadata, listing
//! - [`IJournalSink`] - Durable store for checkpoint records
//! - [`IProgressSink`] - Byte deltas and final job outcomes
//! - [`IOverwritePrompt`] - Accept/reject overwriting an existing destination
//! - [`IMemoryProbe`] - Host memory available for buffers

pub mod journal_sink;
pub mod memory_probe;
pub mod overwrite_prompt;
pub mod progress_sink;
pub mod storage_client;

pub use journal_sink::IJournalSink;
pub use memory_probe::IMemoryProbe;
pub use overwrite_prompt::{IOverwritePrompt, OverwriteQuery};
pub use progress_sink::{IProgressSink, JobOutcome};
pub use storage_client::{DataRange, IStorageClient, ListEntry, StorageError};
