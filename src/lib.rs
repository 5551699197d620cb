//! tfgate workspace-level test utilities.
//!
//! This crate exists solely to support workspace-level integration tests,
//! particularly the BDD/cucumber tests in `tests/cucumber.rs`.
//!
//! The actual tfgate functionality is in the workspace member crates:
//! - `tfgate-types`: Shared types and JSON schemas
//! - `tfgate-config`: Config file loading and merging
//! - `tfgate-domain`: Checks and verdicts
//! - `tfgate-adapters`: Process runner and Terraform provisioner
//! - `tfgate-app`: The scenario use case
//! - `tfgate-cli`: CLI interface
