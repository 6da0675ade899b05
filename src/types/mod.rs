// ABOUTME: Typed identifiers and validated domain values.
// ABOUTME: Phantom IDs, image references, and DNS-label resource names.

mod id;
mod image_ref;
mod resource_name;

pub use id::{
    ApplicationId, ContainerId, DatabaseId, DeploymentId, EnvironmentId, Id, ProjectId,
};
pub use image_ref::{ImageRef, ParseImageRefError};
pub use resource_name::{ResourceName, ResourceNameError, slugify};
