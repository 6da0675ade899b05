// ABOUTME: Application-wide error type for the mikrocloud binary and config layer.
// ABOUTME: Module errors convert in through thiserror `#[from]`.

use crate::build::BuildError;
use crate::database::DatabaseError;
use crate::runtime::{RuntimeError, RuntimeInfoError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("runtime query failed: {0}")]
    RuntimeInfo(#[from] RuntimeInfoError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
