// ABOUTME: Container runtime contract, engine detection, and adapters.
// ABOUTME: BollardRuntime talks to Docker or Podman; MemoryRuntime is an in-process fake.

mod bollard;
mod detection;
mod error;
mod memory;
pub mod traits;
mod types;

pub use self::bollard::BollardRuntime;
pub use detection::{DetectionError, detect_local};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use memory::{FailOn, MemoryRuntime, ScriptedRun};
pub use traits::{
    BuildImageConfig, ContainerConfig, ContainerError, ContainerFilters, ContainerInfo,
    ContainerOps, ContainerState, ContainerSummary, FullRuntime, ImageError, ImageOps, LogError,
    LogLine, LogOps, LogOptions, LogStream, LogStreamBox, MountKind, PortMapping, Protocol,
    RegistryAuth, RestartPolicyConfig, RuntimeInfo as RuntimeInfoTrait, RuntimeInfoError,
    RuntimeMetadata, VolumeMount, collect_logs,
};
pub use types::{RuntimeConfig, RuntimeEndpoint, RuntimeType};

use traits::RuntimeInfo as _;

/// Labels every container created by this crate carries.
pub mod labels {
    pub const MANAGED: &str = "mikrocloud.managed";
    pub const DEPLOYMENT: &str = "mikrocloud.deployment";
    pub const APPLICATION: &str = "mikrocloud.application";
    pub const DATABASE: &str = "mikrocloud.database";
    pub const ROLE: &str = "mikrocloud.role";
    /// Image a builder container is expected to produce.
    pub const BUILD_OUTPUT: &str = "mikrocloud.build.output";
}

/// Detect the local engine and open a client to it.
pub async fn connect_local(config: Option<&RuntimeConfig>) -> Result<BollardRuntime, RuntimeError> {
    let endpoint = detect_local(config)?;
    let runtime = BollardRuntime::connect(&endpoint)?;
    runtime.ping().await?;
    Ok(runtime)
}
