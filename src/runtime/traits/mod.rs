// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ContainerOps, ImageOps, LogOps, RuntimeInfo, and the FullRuntime bundle.

mod container;
mod image;
mod logs;
mod runtime_info;
pub(crate) mod sealed;
mod shared_types;

pub use container::{ContainerError, ContainerFilters, ContainerOps, ContainerSummary};
pub use image::{ImageError, ImageOps};
pub use logs::{LogError, LogLine, LogOps, LogOptions, LogStream, LogStreamBox, collect_logs};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;

/// Everything the orchestration layer needs from an engine.
pub trait FullRuntime: ContainerOps + ImageOps + LogOps + RuntimeInfo + 'static {}

impl<T> FullRuntime for T where T: ContainerOps + ImageOps + LogOps + RuntimeInfo + 'static {}
