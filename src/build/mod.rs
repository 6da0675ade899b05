// ABOUTME: Turns application source into container images.
// ABOUTME: Requests are planned per strategy and executed inside builder containers.

mod error;
mod orchestrator;
mod plan;
mod request;
mod source;

pub use error::BuildError;
pub use orchestrator::{BuildConfig, BuildOrchestrator, BuildResult};
pub use plan::{
    BuildPlan, BuildStep, BuilderImages, GeneratedFile, STATIC_DOCKERFILE, WORKSPACE_MOUNT,
    compose_project, plan_build, shell_quote,
};
pub use request::{
    BuildRequest, BuildSettings, BuildStrategy, BuildpackConfig, ComposeConfig, DockerfileConfig,
    SourceLocation, StaticSiteConfig, StrategyKind,
};
pub use source::{CommitInfo, GitCliFetcher, SourceError, SourceFetcher, Workspace};
