//! Integration test suite for kindlab.
//!
//! These tests drive warmup, node election, tier sequencing and status
//! probing end to end against in-memory collaborators.
//!
//! # Test Categories
//!
//! - `election`: Node election across cluster topologies
//! - `warmup`: Model acquisition, image pre-staging and retries
//! - `sequencer`: Tier ordering and fail-fast cancellation
//! - `status`: Concurrent health probing
//!
//! # CI Compatibility
//!
//! No cluster, registry or network access is needed; every external tool
//! is replaced by a fake from `fixtures`.


mod status;
mod warmup;
