// ABOUTME: Library root for mikrocloud: builds, deployments, databases, reconciliation.
// ABOUTME: The CLI binary in main.rs drives config, engine checks, and one-off builds.

pub mod build;
pub mod config;
pub mod database;
pub mod deploy;
pub mod error;
pub mod output;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod types;
