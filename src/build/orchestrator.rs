// ABOUTME: Runs build plans inside ephemeral builder containers.
// ABOUTME: Fetches source, executes each step, and reports a BuildResult with captured logs.

use crate::build::error::BuildError;
use crate::build::plan::{
    BuildPlan, BuildStep, BuilderImages, WORKSPACE_MOUNT, host_path, plan_build,
};
use crate::build::request::BuildRequest;
use crate::build::source::{CommitInfo, SourceError, SourceFetcher, Workspace};
use crate::runtime::{
    ContainerConfig, ContainerError, FullRuntime, ImageError, LogOptions, VolumeMount,
    collect_logs, labels,
};
use crate::types::{ContainerId, ImageRef, slugify};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ENGINE_SOCKET_MOUNT: &str = "/var/run/docker.sock";

/// Build section of the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Directory holding per-build scratch workspaces. Must be visible to the
    /// engine at the same path, since builder containers bind-mount it.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    /// Engine socket mounted into builder containers.
    #[serde(default = "default_engine_socket")]
    pub engine_socket: String,
    #[serde(default)]
    pub images: BuilderImages,
    /// Lines of builder output quoted in a failed step's error.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
    /// Taken from the containers section.
    #[serde(skip, default = "default_prefix")]
    pub name_prefix: String,
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("mikrocloud").join("builds")
}

fn default_engine_socket() -> String {
    ENGINE_SOCKET_MOUNT.to_string()
}

fn default_log_tail() -> usize {
    20
}

fn default_prefix() -> String {
    "mikrocloud".to_string()
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            engine_socket: default_engine_socket(),
            images: BuilderImages::default(),
            log_tail: default_log_tail(),
            name_prefix: default_prefix(),
        }
    }
}

/// Outcome of a build. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub success: bool,
    /// Set iff `success`.
    pub image: Option<ImageRef>,
    pub image_digest: Option<String>,
    pub commit: Option<CommitInfo>,
    /// Set iff not `success`.
    pub error: Option<String>,
    pub logs: String,
}

impl BuildResult {
    pub fn succeeded(image: ImageRef, image_digest: Option<String>, logs: String) -> Self {
        Self {
            success: true,
            image: Some(image),
            image_digest,
            commit: None,
            error: None,
            logs,
        }
    }

    pub fn failed(error: impl Into<String>, logs: String) -> Self {
        Self {
            success: false,
            image: None,
            image_digest: None,
            commit: None,
            error: Some(error.into()),
            logs,
        }
    }
}

/// Why a build stopped early. Rendered into the failed result.
#[derive(Debug, Error)]
enum StepFailure {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to write build file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("{0} not found in build context")]
    MissingPath(String),

    #[error("step {step} exited with code {code}{tail}")]
    NonZeroExit {
        step: &'static str,
        code: i64,
        tail: String,
    },

    #[error("build cancelled")]
    Cancelled,
}

/// Append-only build transcript.
#[derive(Default)]
struct BuildLog(String);

impl BuildLog {
    fn line(&mut self, line: impl AsRef<str>) {
        self.append(line.as_ref());
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.0.push_str(text);
        if !text.ends_with('\n') {
            self.0.push('\n');
        }
    }
}

fn tail_lines(output: &str, n: usize) -> String {
    let lines: Vec<&str> = output.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() || n == 0 {
        return String::new();
    }
    let start = lines.len().saturating_sub(n);
    format!(": {}", lines[start..].join("\n"))
}

/// Dispatches build requests to builder containers on a runtime.
pub struct BuildOrchestrator<R> {
    runtime: Arc<R>,
    fetcher: Arc<dyn SourceFetcher>,
    config: BuildConfig,
}

impl<R> Clone for BuildOrchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            fetcher: Arc::clone(&self.fetcher),
            config: self.config.clone(),
        }
    }
}

impl<R: FullRuntime> BuildOrchestrator<R> {
    pub fn new(runtime: Arc<R>, fetcher: Arc<dyn SourceFetcher>, config: BuildConfig) -> Self {
        Self {
            runtime,
            fetcher,
            config,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build `request` into its target image.
    ///
    /// Malformed requests fail with [`BuildError`] before any container work.
    /// Anything that goes wrong afterwards, including cancellation, is
    /// reported as a result with `success == false`.
    pub async fn build(
        &self,
        request: &BuildRequest,
        cancel: &CancellationToken,
    ) -> Result<BuildResult, BuildError> {
        let plan = plan_build(request, &self.config.images)?;
        info!(
            build = %request.id,
            strategy = %request.strategy.kind(),
            image = %request.image,
            steps = plan.steps.len(),
            "starting build"
        );

        let mut log = BuildLog::default();
        let mut commit = None;
        let outcome = self
            .execute(request, &plan, &mut log, &mut commit, cancel)
            .await;

        let mut result = match outcome {
            Ok(digest) => {
                log.line(format!("Successfully built {}", request.image));
                info!(build = %request.id, image = %request.image, "build succeeded");
                BuildResult::succeeded(request.image.clone(), digest, log.0)
            }
            Err(failure) => {
                let message = failure.to_string();
                log.line(format!("Build failed: {}", message));
                warn!(build = %request.id, error = %message, "build failed");
                BuildResult::failed(message, log.0)
            }
        };
        result.commit = commit;
        Ok(result)
    }

    async fn execute(
        &self,
        request: &BuildRequest,
        plan: &BuildPlan,
        log: &mut BuildLog,
        commit: &mut Option<CommitInfo>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, StepFailure> {
        let workspace = Workspace::create(&self.config.workspace_root)?;
        let outcome = self
            .run_in_workspace(&workspace, request, plan, log, commit, cancel)
            .await;
        if let Err(e) = workspace.close() {
            warn!(build = %request.id, error = %e, "failed to remove build workspace");
        }
        outcome
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        request: &BuildRequest,
        plan: &BuildPlan,
        log: &mut BuildLog,
        commit: &mut Option<CommitInfo>,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, StepFailure> {
        let checkout = workspace.checkout();
        log.line(format!(
            "Fetching {} at {}",
            request.source.url, request.source.reference
        ));
        let fetched = tokio::select! {
            fetched = self.fetcher.fetch(&request.source, &checkout) => fetched?,
            _ = cancel.cancelled() => return Err(StepFailure::Cancelled),
        };
        if let Some(hash) = &fetched.hash {
            log.line(format!("Checked out commit {}", hash));
        }
        *commit = Some(fetched);

        let context = checkout.join(&plan.context);
        if !context.is_dir() {
            return Err(StepFailure::Source(SourceError::MissingContext(
                plan.context.display().to_string(),
            )));
        }

        let total = plan.steps.len();
        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StepFailure::Cancelled);
            }
            log.line(format!("Step {}/{}: {}", index + 1, total, step.name));

            if let Some(missing) = step
                .requires
                .iter()
                .find(|p| !host_path(&checkout, plan, p).exists())
            {
                return Err(StepFailure::MissingPath(missing.display().to_string()));
            }
            for file in &step.files {
                tokio::fs::write(host_path(&checkout, plan, &file.path), &file.contents).await?;
            }

            self.ensure_image(&step.image, log).await?;
            self.run_step(request, plan, step, index, &checkout, log, cancel)
                .await?;
        }

        if let Some(source) = &plan.retag_from {
            self.runtime.tag_image(source, &request.image).await?;
            log.line(format!("Tagged {} as {}", source, request.image));
        }

        match self.runtime.image_digest(&request.image).await {
            Ok(digest) => Ok(digest),
            Err(e) => {
                warn!(image = %request.image, error = %e, "could not read image digest");
                Ok(None)
            }
        }
    }

    async fn ensure_image(&self, image: &ImageRef, log: &mut BuildLog) -> Result<(), StepFailure> {
        if self.runtime.image_exists(image).await? {
            return Ok(());
        }
        log.line(format!("Pulling builder image {}", image));
        self.runtime.pull_image(image, None).await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        request: &BuildRequest,
        plan: &BuildPlan,
        step: &BuildStep,
        index: usize,
        checkout: &Path,
        log: &mut BuildLog,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        let config = self.builder_config(request, plan, step, index, checkout);
        let id = self.runtime.create_container(&config).await?;
        debug!(build = %request.id, container = %id, step = step.name, "builder container created");

        let outcome = self.drive(&id, step, log, cancel).await;

        // Builder containers never outlive their step, whatever the outcome.
        if let Err(e) = self.runtime.remove_container(&id, true).await
            && !e.is_benign_for_teardown()
        {
            warn!(container = %id, error = %e, "failed to remove builder container");
        }
        outcome
    }

    fn builder_config(
        &self,
        request: &BuildRequest,
        plan: &BuildPlan,
        step: &BuildStep,
        index: usize,
        checkout: &Path,
    ) -> ContainerConfig {
        let name = format!(
            "{}-build-{}-{}",
            self.config.name_prefix,
            slugify(&request.id),
            index + 1
        );

        let mut config = ContainerConfig::new(name, step.image.clone());
        config.command = Some(step.command());
        config.working_dir = Some(plan.container_workdir());
        config.env = step.env.clone();
        config.privileged = true;
        config.volumes = vec![
            VolumeMount::bind(checkout.to_string_lossy(), WORKSPACE_MOUNT),
            VolumeMount::bind(&self.config.engine_socket, ENGINE_SOCKET_MOUNT),
        ];

        let mut builder_labels = HashMap::from([
            (labels::MANAGED.to_string(), "true".to_string()),
            (labels::ROLE.to_string(), "builder".to_string()),
        ]);
        if let Some(output) = &step.produces {
            builder_labels.insert(labels::BUILD_OUTPUT.to_string(), output.to_string());
        }
        config.labels = builder_labels;
        config
    }

    async fn drive(
        &self,
        id: &ContainerId,
        step: &BuildStep,
        log: &mut BuildLog,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        self.runtime.start_container(id).await?;

        let code = tokio::select! {
            code = self.runtime.wait_container(id) => code?,
            _ = cancel.cancelled() => {
                if let Err(e) = self.runtime.stop_container(id, Duration::from_secs(5)).await
                    && !e.is_benign_for_teardown()
                {
                    warn!(container = %id, error = %e, "failed to stop cancelled builder");
                }
                return Err(StepFailure::Cancelled);
            }
        };

        let output = match self
            .runtime
            .container_logs(id, &LogOptions::all(false))
            .await
        {
            Ok(stream) => collect_logs(stream)
                .await
                .unwrap_or_else(|e| format!("(builder output truncated: {})\n", e)),
            Err(e) => format!("(builder output unavailable: {})\n", e),
        };
        log.append(&output);

        if code != 0 {
            return Err(StepFailure::NonZeroExit {
                step: step.name,
                code,
                tail: tail_lines(&output, self.config.log_tail),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_log_terminates_lines() {
        let mut log = BuildLog::default();
        log.line("a");
        log.append("b\n");
        log.append("");
        assert_eq!(log.0, "a\nb\n");
    }

    #[test]
    fn tail_keeps_last_non_blank_lines() {
        assert_eq!(tail_lines("one\ntwo\n\nthree\n", 2), ": two\nthree");
        assert_eq!(tail_lines("", 5), "");
    }
}
