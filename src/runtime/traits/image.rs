// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pull, check existence, build from a context, tag, and read digests.

use super::sealed::Sealed;
use super::shared_types::{BuildImageConfig, RegistryAuth};
use crate::types::ImageRef;
use async_trait::async_trait;

/// Image operations.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Pull an image from a registry.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError>;

    /// Check if an image exists locally.
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError>;

    /// Build an image from a context directory and return the engine's log output.
    async fn build_image(&self, config: &BuildImageConfig) -> Result<String, ImageError>;

    /// Add `target` as an additional name for `source`.
    async fn tag_image(&self, source: &str, target: &ImageRef) -> Result<(), ImageError>;

    /// Content-addressed identifier of a local image, if the engine reports one.
    async fn image_digest(&self, reference: &ImageRef) -> Result<Option<String>, ImageError>;
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("authentication failed for registry: {0}")]
    AuthenticationFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
