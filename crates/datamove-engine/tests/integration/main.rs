//! Integration tests for datamove-engine
//!
//! Drive the TransferManager against an in-memory storage client that
//! records every call, and against the local filesystem adapter.

mod common;

mod test_directory;
mod test_local;
mod test_negotiation;
mod test_resume;
