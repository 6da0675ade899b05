// ABOUTME: Deployment records, their state machine, and the lifecycle driving them.
// ABOUTME: Exports the repository and catalog ports with in-memory implementations.

mod application;
mod deployment;
mod error;
mod lifecycle;
mod repository;
mod state;

pub use application::{
    Application, ApplicationCatalog, DeploymentSource, InMemoryApplicationCatalog,
};
pub use deployment::{Deployment, NewDeployment, Trigger, TriggerKind};
pub use error::{DeployError, DeployErrorKind};
pub use lifecycle::{DeploymentLifecycle, DeploymentLogs};
pub use repository::{DeploymentRepository, InMemoryDeploymentRepository, modify_deployment};
pub use state::{DeploymentEvent, DeploymentStatus};
