// ABOUTME: In-process container runtime that keeps containers and images in memory.
// ABOUTME: Supports failure injection and scripted builder outcomes for tests and dry runs.

use crate::runtime::labels;
use crate::runtime::traits::sealed::Sealed;
use crate::runtime::traits::{
    BuildImageConfig, ContainerConfig, ContainerError, ContainerFilters, ContainerInfo,
    ContainerOps, ContainerState, ContainerSummary, ImageError, ImageOps, LogError, LogLine,
    LogOps, LogOptions, LogStream, LogStreamBox, RegistryAuth, RuntimeInfo, RuntimeInfoError,
    RuntimeMetadata,
};
use crate::types::{ContainerId, ImageRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    Create,
    Start,
    Stop,
    Restart,
    Remove,
    Inspect,
    List,
    Wait,
    Rename,
    Logs,
    Pull,
    Build,
    Tag,
}

/// Outcome of a container that runs to completion (builder containers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedRun {
    pub exit_code: i64,
    pub output: String,
}

impl ScriptedRun {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    pub fn failure(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }
}

struct MemContainer {
    id: ContainerId,
    config: ContainerConfig,
    state: ContainerState,
    exit_code: Option<i64>,
    logs: Vec<LogLine>,
    created: DateTime<Utc>,
}

impl MemContainer {
    fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            id: self.id.clone(),
            name: self.config.name.clone(),
            image: self.config.image.to_string(),
            state: self.state,
            status: self.status_text(),
            labels: self.config.labels.clone(),
        }
    }

    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id.clone(),
            name: self.config.name.clone(),
            image: self.config.image.to_string(),
            state: self.state,
            status: self.status_text(),
            exit_code: self.exit_code,
            ports: self.config.ports.clone(),
            created: self.created.to_rfc3339(),
            labels: self.config.labels.clone(),
        }
    }

    fn status_text(&self) -> String {
        match (self.state, self.exit_code) {
            (ContainerState::Exited | ContainerState::Dead, Some(code)) => {
                format!("{} ({})", self.state, code)
            }
            (state, _) => state.to_string(),
        }
    }

    fn is_builder(&self) -> bool {
        self.config.labels.get(labels::ROLE).map(String::as_str) == Some("builder")
    }

    fn command_line(&self) -> String {
        self.config
            .command
            .as_ref()
            .map(|c| c.join(" "))
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct State {
    // Keyed by ID; IDs are zero-padded counters so iteration follows creation order.
    containers: BTreeMap<String, MemContainer>,
    images: HashMap<String, String>,
    failures: HashMap<FailOn, u32>,
    scripts: Vec<(String, ScriptedRun)>,
    next_id: u64,
}

impl State {
    fn take_failure(&mut self, op: FailOn) -> bool {
        match self.failures.get_mut(&op) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }

    fn container_mut(&mut self, id: &ContainerId) -> Result<&mut MemContainer, ContainerError> {
        self.containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    fn resolve(&self, id_or_name: &str) -> Option<String> {
        if self.containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        self.containers
            .values()
            .find(|c| c.config.name == id_or_name)
            .map(|c| c.id.to_string())
    }

    fn next_digest(&mut self) -> String {
        self.next_id += 1;
        format!("sha256:{:064x}", self.next_id)
    }

    fn register_image(&mut self, reference: &str) {
        if !self.images.contains_key(reference) {
            let digest = self.next_digest();
            self.images.insert(reference.to_string(), digest);
        }
    }

    fn run_to_completion(&mut self, id: &str) {
        let Some(container) = self.containers.get(id) else {
            return;
        };
        let command = container.command_line();
        let outcome = self
            .scripts
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, run)| run.clone())
            .unwrap_or_else(|| ScriptedRun::success(""));
        let produced = container.config.labels.get(labels::BUILD_OUTPUT).cloned();

        if outcome.exit_code == 0
            && let Some(image) = produced
        {
            self.register_image(&image);
        }
        if let Some(container) = self.containers.get_mut(id) {
            container.state = ContainerState::Exited;
            container.exit_code = Some(outcome.exit_code);
            container.logs.extend(split_output(&outcome.output));
        }
    }
}

fn split_output(output: &str) -> Vec<LogLine> {
    output
        .split_inclusive('\n')
        .map(|line| LogLine {
            content: line.to_string(),
            stream: LogStream::Stdout,
        })
        .collect()
}

fn injected(op: FailOn) -> String {
    format!("injected {:?} failure", op)
}

/// A container engine that lives entirely in memory.
///
/// Long-running containers stay `running` once started. Containers labelled
/// as builders run to completion on start: the first registered script whose
/// needle occurs in the command decides the exit code and output, and a
/// successful run registers the image named by the build-output label.
#[derive(Default)]
pub struct MemoryRuntime {
    state: Mutex<State>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `reference` available locally.
    pub fn add_image(&self, reference: &str) {
        self.state.lock().register_image(reference);
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().images.contains_key(reference)
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&self, op: FailOn, times: u32) {
        self.state.lock().failures.insert(op, times);
    }

    /// Fail every call of `op` until [`MemoryRuntime::clear_failures`].
    pub fn fail_always(&self, op: FailOn) {
        self.state.lock().failures.insert(op, u32::MAX);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Decide the outcome of builder containers whose command contains `needle`.
    pub fn script(&self, needle: impl Into<String>, run: ScriptedRun) {
        self.state.lock().scripts.push((needle.into(), run));
    }

    /// Simulate a container process dying with `exit_code`.
    pub fn kill(&self, id_or_name: &str, exit_code: i64) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.resolve(id_or_name) else {
            return false;
        };
        if let Some(container) = state.containers.get_mut(&id) {
            container.state = if exit_code == 137 {
                ContainerState::Dead
            } else {
                ContainerState::Exited
            };
            container.exit_code = Some(exit_code);
        }
        true
    }

    /// Remove a container behind the orchestrator's back.
    pub fn vanish(&self, id_or_name: &str) -> bool {
        let mut state = self.state.lock();
        match state.resolve(id_or_name) {
            Some(id) => state.containers.remove(&id).is_some(),
            None => false,
        }
    }

    /// Append output to a container's log.
    pub fn emit_log(&self, id_or_name: &str, output: &str) {
        let mut state = self.state.lock();
        if let Some(id) = state.resolve(id_or_name)
            && let Some(container) = state.containers.get_mut(&id)
        {
            container.logs.extend(split_output(output));
        }
    }

    /// Snapshot of every container in creation order.
    pub fn containers(&self) -> Vec<ContainerSummary> {
        self.state
            .lock()
            .containers
            .values()
            .map(MemContainer::summary)
            .collect()
    }

    /// Inspect by exact name.
    pub fn find(&self, name: &str) -> Option<ContainerInfo> {
        self.state
            .lock()
            .containers
            .values()
            .find(|c| c.config.name == name)
            .map(MemContainer::info)
    }

    /// The configuration a container was created with.
    pub fn config_of(&self, id_or_name: &str) -> Option<ContainerConfig> {
        let state = self.state.lock();
        state
            .resolve(id_or_name)
            .and_then(|id| state.containers.get(&id))
            .map(|c| c.config.clone())
    }
}

impl Sealed for MemoryRuntime {}

#[async_trait]
impl RuntimeInfo for MemoryRuntime {
    async fn info(&self) -> Result<RuntimeMetadata, RuntimeInfoError> {
        Ok(RuntimeMetadata {
            name: "memory".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: "none".to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        })
    }

    async fn ping(&self) -> Result<(), RuntimeInfoError> {
        Ok(())
    }
}

#[async_trait]
impl ImageOps for MemoryRuntime {
    async fn pull_image(
        &self,
        reference: &ImageRef,
        _auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Pull) {
            return Err(ImageError::PullFailed(format!(
                "{}: {}",
                reference,
                injected(FailOn::Pull)
            )));
        }
        state.register_image(&reference.to_string());
        Ok(())
    }

    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError> {
        Ok(self.state.lock().images.contains_key(&reference.to_string()))
    }

    async fn build_image(&self, config: &BuildImageConfig) -> Result<String, ImageError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Build) {
            return Err(ImageError::BuildFailed(injected(FailOn::Build)));
        }
        if !config.context.join(&config.dockerfile).exists() {
            return Err(ImageError::BuildFailed(format!(
                "cannot locate {} in build context",
                config.dockerfile
            )));
        }
        let tag = config.tag.to_string();
        state.images.remove(&tag);
        state.register_image(&tag);
        Ok(format!("Successfully tagged {}\n", tag))
    }

    async fn tag_image(&self, source: &str, target: &ImageRef) -> Result<(), ImageError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Tag) {
            return Err(ImageError::Runtime(injected(FailOn::Tag)));
        }
        let digest = state
            .images
            .get(source)
            .or_else(|| state.images.get(&format!("{}:latest", source)))
            .cloned()
            .ok_or_else(|| ImageError::NotFound(source.to_string()))?;
        state.images.insert(target.to_string(), digest);
        Ok(())
    }

    async fn image_digest(&self, reference: &ImageRef) -> Result<Option<String>, ImageError> {
        self.state
            .lock()
            .images
            .get(&reference.to_string())
            .cloned()
            .map(Some)
            .ok_or_else(|| ImageError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl ContainerOps for MemoryRuntime {
    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerId, ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Create) {
            return Err(ContainerError::Runtime(injected(FailOn::Create)));
        }
        if state.containers.values().any(|c| c.config.name == config.name) {
            return Err(ContainerError::AlreadyExists(config.name.clone()));
        }
        if !state.images.contains_key(&config.image.to_string()) {
            return Err(ContainerError::ImageNotFound(config.image.to_string()));
        }

        state.next_id += 1;
        let id = ContainerId::new(format!("{:016x}", state.next_id));
        state.containers.insert(
            id.to_string(),
            MemContainer {
                id: id.clone(),
                config: config.clone(),
                state: ContainerState::Created,
                exit_code: None,
                logs: Vec::new(),
                created: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Start) {
            return Err(ContainerError::Runtime(injected(FailOn::Start)));
        }
        let container = state.container_mut(id)?;
        if container.state == ContainerState::Running {
            return Err(ContainerError::AlreadyRunning(id.to_string()));
        }
        if container.is_builder() {
            state.run_to_completion(id.as_str());
        } else {
            container.state = ContainerState::Running;
            container.exit_code = None;
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Stop) {
            return Err(ContainerError::Runtime(injected(FailOn::Stop)));
        }
        let container = state.container_mut(id)?;
        if !container.state.is_live() {
            return Err(ContainerError::NotRunning(id.to_string()));
        }
        container.state = ContainerState::Exited;
        container.exit_code = Some(0);
        Ok(())
    }

    async fn restart_container(
        &self,
        id: &ContainerId,
        _timeout: Duration,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Restart) {
            return Err(ContainerError::Runtime(injected(FailOn::Restart)));
        }
        let container = state.container_mut(id)?;
        container.state = ContainerState::Running;
        container.exit_code = None;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId, force: bool) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Remove) {
            return Err(ContainerError::Runtime(injected(FailOn::Remove)));
        }
        let container = state.container_mut(id)?;
        if container.state.is_live() && !force {
            return Err(ContainerError::Runtime(format!(
                "cannot remove running container {}",
                id
            )));
        }
        state.containers.remove(id.as_str());
        Ok(())
    }

    async fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInfo, ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Inspect) {
            return Err(ContainerError::Runtime(injected(FailOn::Inspect)));
        }
        state.container_mut(id).map(|c| c.info())
    }

    async fn list_containers(
        &self,
        filters: &ContainerFilters,
    ) -> Result<Vec<ContainerSummary>, ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::List) {
            return Err(ContainerError::Runtime(injected(FailOn::List)));
        }
        Ok(state
            .containers
            .values()
            .filter(|c| filters.all || c.state == ContainerState::Running)
            .filter(|c| {
                filters
                    .name
                    .as_ref()
                    .is_none_or(|name| c.config.name.contains(name.as_str()))
            })
            .filter(|c| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.config.labels.get(k) == Some(v))
            })
            .map(MemContainer::summary)
            .collect())
    }

    async fn wait_container(&self, id: &ContainerId) -> Result<i64, ContainerError> {
        {
            let mut state = self.state.lock();
            if state.take_failure(FailOn::Wait) {
                return Err(ContainerError::Runtime(injected(FailOn::Wait)));
            }
        }
        loop {
            {
                let mut state = self.state.lock();
                let container = state.container_mut(id)?;
                if !container.state.is_live() && container.state != ContainerState::Created {
                    return Ok(container.exit_code.unwrap_or(0));
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn rename_container(
        &self,
        id: &ContainerId,
        new_name: &str,
    ) -> Result<(), ContainerError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Rename) {
            return Err(ContainerError::Runtime(injected(FailOn::Rename)));
        }
        if state
            .containers
            .values()
            .any(|c| c.config.name == new_name && c.id != *id)
        {
            return Err(ContainerError::AlreadyExists(new_name.to_string()));
        }
        state.container_mut(id)?.config.name = new_name.to_string();
        Ok(())
    }
}

#[async_trait]
impl LogOps for MemoryRuntime {
    async fn container_logs(
        &self,
        id: &ContainerId,
        opts: &LogOptions,
    ) -> Result<LogStreamBox, LogError> {
        let mut state = self.state.lock();
        if state.take_failure(FailOn::Logs) {
            return Err(LogError::Runtime(injected(FailOn::Logs)));
        }
        let container = state
            .containers
            .get(id.as_str())
            .ok_or_else(|| LogError::ContainerNotFound(id.to_string()))?;

        let mut lines: Vec<LogLine> = container
            .logs
            .iter()
            .filter(|l| match l.stream {
                LogStream::Stdout => opts.stdout,
                LogStream::Stderr => opts.stderr,
            })
            .cloned()
            .collect();
        if let Some(tail) = opts.tail {
            let keep = usize::try_from(tail).unwrap_or(usize::MAX);
            if lines.len() > keep {
                lines.drain(..lines.len() - keep);
            }
        }

        Ok(Box::pin(futures::stream::iter(lines.into_iter().map(Ok))))
    }
}
