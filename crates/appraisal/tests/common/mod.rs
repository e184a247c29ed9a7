//! Shared test utilities for appraisal integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated pipeline runs over a temporary artifact store
//! - Builders for fixture documents (images with metadata, PDFs, workbooks)
//!   and configuration documents

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
