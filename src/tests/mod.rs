//! Unit and integration tests.
//!
//! - **policy_tests**: reconciliation decisions per scan mode
//! - **names_tests**: file name normalization and tag parsing
//! - **inventory_tests**: library layouts, listings and exclusions
//! - **providers_tests**: dataset provider scoring and the registry
//! - **catalog_tests**: SQLite catalog store and schema
//! - **scanner_tests**: end-to-end scan runs with stub providers
//! - **jobs_tests**: queueing, cancellation and timeouts
//! - **config_tests**: configuration loading and validation
//! - **error_tests**: HTTP error mapping and request validation
//! - **api_tests**: HTTP routes
//!
//! Shared fixtures live in [`support`].

pub mod support;

pub mod scanner_tests;
