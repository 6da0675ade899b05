// ABOUTME: Error types for deployment lifecycle commands.
// ABOUTME: Guard violations are distinct variants; DeployErrorKind matches without payloads.

use crate::build::BuildError;
use crate::deploy::state::{DeploymentEvent, DeploymentStatus};
use crate::runtime::{ContainerError, ImageError};
use crate::store::RepositoryError;
use crate::types::{ApplicationId, DeploymentId};

/// Errors returned synchronously by lifecycle commands.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("deployment not found: {0}")]
    NotFound(DeploymentId),

    #[error("application not found: {0}")]
    ApplicationNotFound(ApplicationId),

    /// Another deployment of the application is building or deploying.
    #[error("deployment {running} of application {application} is already in progress")]
    AlreadyInProgress {
        application: ApplicationId,
        running: DeploymentId,
    },

    #[error("cannot apply '{event}' to a {from} deployment")]
    InvalidTransition {
        from: DeploymentStatus,
        event: DeploymentEvent,
    },

    #[error("deployment {0} is not running")]
    NotRunning(DeploymentId),

    #[error("deployment {0} is a production deployment and cannot be deleted")]
    ProductionDeployment(DeploymentId),

    #[error("deployment {0} is still in progress")]
    StillInProgress(DeploymentId),

    #[error("deployment {0} is already a production deployment")]
    AlreadyProduction(DeploymentId),

    #[error("deployment {0} has no image to promote")]
    NothingToPromote(DeploymentId),

    #[error("deployment {0} has no container")]
    NoContainer(DeploymentId),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Payload-free discriminant of [`DeployError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    NotFound,
    ApplicationNotFound,
    AlreadyInProgress,
    InvalidTransition,
    NotRunning,
    ProductionDeployment,
    StillInProgress,
    AlreadyProduction,
    NothingToPromote,
    NoContainer,
    Build,
    Container,
    Image,
    Repository,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            Self::NotFound(_) => DeployErrorKind::NotFound,
            Self::ApplicationNotFound(_) => DeployErrorKind::ApplicationNotFound,
            Self::AlreadyInProgress { .. } => DeployErrorKind::AlreadyInProgress,
            Self::InvalidTransition { .. } => DeployErrorKind::InvalidTransition,
            Self::NotRunning(_) => DeployErrorKind::NotRunning,
            Self::ProductionDeployment(_) => DeployErrorKind::ProductionDeployment,
            Self::StillInProgress(_) => DeployErrorKind::StillInProgress,
            Self::AlreadyProduction(_) => DeployErrorKind::AlreadyProduction,
            Self::NothingToPromote(_) => DeployErrorKind::NothingToPromote,
            Self::NoContainer(_) => DeployErrorKind::NoContainer,
            Self::Build(_) => DeployErrorKind::Build,
            Self::Container(_) => DeployErrorKind::Container,
            Self::Image(_) => DeployErrorKind::Image,
            Self::Repository(_) => DeployErrorKind::Repository,
        }
    }
}
