// ABOUTME: Errors for malformed build input, reported before any container work.
// ABOUTME: Execution failures are not errors; they come back as failed build results.

use crate::build::request::StrategyKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("build request has no id")]
    MissingId,

    #[error("source URL is empty")]
    EmptySourceUrl,

    #[error("source reference is empty")]
    EmptyReference,

    #[error("context root escapes the source checkout: {0}")]
    InvalidContextRoot(String),

    #[error("target image has no tag: {0}")]
    UntaggedImage(String),

    #[error("invalid image reference: {0}")]
    InvalidImage(#[from] crate::types::ParseImageRefError),

    #[error("unknown build strategy: {0}")]
    UnknownStrategy(String),

    #[error("{0} strategy requires its configuration block")]
    MissingConfig(StrategyKind),

    #[error("{strategy} strategy cannot carry a {found} configuration block")]
    MismatchedConfig {
        strategy: StrategyKind,
        found: StrategyKind,
    },

    #[error("invalid {strategy} configuration: {reason}")]
    InvalidConfig {
        strategy: StrategyKind,
        reason: String,
    },
}
