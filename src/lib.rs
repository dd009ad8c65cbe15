//! # romkeep
//!
//! Indexes a ROM library on disk into a SQLite catalog and enriches it with game
//! metadata from pluggable providers. Scans run as queued background jobs and
//! stream their progress over Server-Sent Events.
//!
//! ## Core Components
//!
//! - [`inventory`]: filesystem layout detection and listings
//! - [`providers`]: metadata provider trait, registry and the dataset provider
//! - [`catalog`]: catalog records and the SQLite store
//! - [`scanner`]: scan orchestration and the reconciliation [`scanner::policy`]
//! - [`jobs`]: the single-worker job queue
//! - [`routes`]: HTTP API handlers
//! - [`config`], [`db`], [`error`], [`metrics`], [`state`], [`types`]: plumbing

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod inventory;
pub mod jobs;
pub mod metrics;
pub mod providers;
pub mod routes;
pub mod scanner;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;
