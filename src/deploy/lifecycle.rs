// ABOUTME: Drives deployments from trigger to running container.
// ABOUTME: One background task per deployment; status changes persist at phase boundaries.

use crate::build::{BuildError, BuildOrchestrator, BuildRequest, BuildResult, BuildStrategy};
use crate::config::ContainerDefaults;
use crate::deploy::application::{Application, ApplicationCatalog, DeploymentSource};
use crate::deploy::deployment::{Deployment, NewDeployment, Trigger, TriggerKind};
use crate::deploy::error::DeployError;
use crate::deploy::repository::{DeploymentRepository, modify_deployment};
use crate::deploy::state::DeploymentStatus;
use crate::runtime::{
    ContainerConfig, ContainerFilters, FullRuntime, ImageError, PortMapping, labels,
};
use crate::store::RepositoryError;
use crate::types::{ApplicationId, ContainerId, DeploymentId, ImageRef};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Build and deploy logs of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentLogs {
    pub build: String,
    pub deploy: String,
}

/// How a deployment obtains its image.
enum ImagePlan {
    Build(BuildRequest),
    Pull(ImageRef),
    Reuse {
        image: ImageRef,
        digest: Option<String>,
        from: u64,
    },
}

impl ImagePlan {
    /// Resolve and validate everything about the image that does not depend
    /// on the deployment record.
    fn for_source(app: &Application, source: &DeploymentSource) -> Result<Self, DeployError> {
        match source {
            DeploymentSource::Git(location) => {
                let request = BuildRequest {
                    id: app.id.to_string(),
                    source: location.clone(),
                    image: app.image_tag(0).map_err(BuildError::from)?,
                    strategy: BuildStrategy::try_from(app.build.clone())?,
                    env: app.env.clone(),
                };
                request.validate()?;
                Ok(ImagePlan::Build(request))
            }
            DeploymentSource::Registry { image } => Ok(ImagePlan::Pull(image.clone())),
        }
    }

    fn bind(self, app: &Application, deployment: &Deployment) -> Result<Self, DeployError> {
        match self {
            ImagePlan::Build(mut request) => {
                request.id = deployment.id().to_string();
                request.image = app
                    .image_tag(deployment.number())
                    .map_err(BuildError::from)?;
                Ok(ImagePlan::Build(request))
            }
            other => Ok(other),
        }
    }
}

struct Task {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

struct Inner<R> {
    runtime: Arc<R>,
    builder: BuildOrchestrator<R>,
    deployments: Arc<dyn DeploymentRepository>,
    applications: Arc<dyn ApplicationCatalog>,
    defaults: ContainerDefaults,
    /// Serializes the in-progress check and creation per application.
    gates: Mutex<HashMap<ApplicationId, Arc<AsyncMutex<()>>>>,
    tasks: Mutex<HashMap<DeploymentId, Task>>,
}

/// Owns the deployment state machine and its background workers.
pub struct DeploymentLifecycle<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for DeploymentLifecycle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: FullRuntime> DeploymentLifecycle<R> {
    pub fn new(
        runtime: Arc<R>,
        builder: BuildOrchestrator<R>,
        deployments: Arc<dyn DeploymentRepository>,
        applications: Arc<dyn ApplicationCatalog>,
        defaults: ContainerDefaults,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                builder,
                deployments,
                applications,
                defaults,
                gates: Mutex::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a new deployment of `application`.
    ///
    /// Returns once the deployment is persisted in `Building`; the build and
    /// deploy phases continue in the background.
    pub async fn trigger_deployment(
        &self,
        application: &ApplicationId,
        trigger: Trigger,
        source_override: Option<DeploymentSource>,
    ) -> Result<Deployment, DeployError> {
        let app = self.inner.application(application).await?;
        let source = source_override.unwrap_or_else(|| app.source.clone());
        let plan = ImagePlan::for_source(&app, &source)?;
        let new = NewDeployment::new(app.id.clone(), trigger);
        self.launch(app, new, plan).await
    }

    /// Trigger a fresh deployment from the application's stored source.
    pub async fn redeploy(
        &self,
        application: &ApplicationId,
        triggered_by: Option<String>,
    ) -> Result<Deployment, DeployError> {
        let trigger = Trigger {
            kind: TriggerKind::Manual,
            triggered_by,
        };
        self.trigger_deployment(application, trigger, None).await
    }

    /// Create a production deployment running the image of a running
    /// non-production one. The source deployment is left untouched.
    pub async fn promote(
        &self,
        id: &DeploymentId,
        trigger: Trigger,
    ) -> Result<Deployment, DeployError> {
        let source = self.get_deployment(id).await?;
        if source.is_production() {
            return Err(DeployError::AlreadyProduction(id.clone()));
        }
        if source.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(id.clone()));
        }
        let image = source
            .image()
            .cloned()
            .ok_or_else(|| DeployError::NothingToPromote(id.clone()))?;

        let app = self.inner.application(source.application_id()).await?;
        let digest = source.image_digest().map(str::to_string);
        let mut new = NewDeployment::new(
            app.id.clone(),
            Trigger {
                kind: TriggerKind::Promotion,
                triggered_by: trigger.triggered_by,
            },
        );
        new.production = true;
        new.image = Some(image.clone());
        new.image_digest = digest.clone();
        new.commit = source.commit().cloned();
        new.promoted_from = Some(id.clone());

        let plan = ImagePlan::Reuse {
            image,
            digest,
            from: source.number(),
        };
        self.launch(app, new, plan).await
    }

    async fn launch(
        &self,
        app: Application,
        new: NewDeployment,
        plan: ImagePlan,
    ) -> Result<Deployment, DeployError> {
        let gate = self.inner.gate(&app.id);
        let _held = gate.lock().await;

        if let Some(latest) = self.inner.deployments.latest_by_application(&app.id).await?
            && latest.status().is_in_progress()
        {
            return Err(DeployError::AlreadyInProgress {
                application: app.id.clone(),
                running: latest.id().clone(),
            });
        }

        let created = self.inner.deployments.create(new).await?;
        let plan = match plan.bind(&app, &created) {
            Ok(plan) => plan,
            Err(e) => {
                let note = format!("Could not prepare deployment: {}", e);
                modify_deployment(self.inner.deployments.as_ref(), created.id(), |d| {
                    d.cancel(&note)
                })
                .await?;
                return Err(e);
            }
        };
        let building =
            modify_deployment(self.inner.deployments.as_ref(), created.id(), |d| d.start_build())
                .await?;

        let id = building.id().clone();
        let cancel = CancellationToken::new();
        self.inner.tasks.lock().insert(
            id.clone(),
            Task {
                cancel: cancel.clone(),
                handle: None,
            },
        );

        let inner = Arc::clone(&self.inner);
        let worker = building.clone();
        let handle = tokio::spawn(async move { inner.run(app, worker, plan, cancel).await });
        if let Some(task) = self.inner.tasks.lock().get_mut(&id) {
            task.handle = Some(handle);
        }

        info!(
            deployment_id = %id,
            application_id = %building.application_id(),
            number = building.number(),
            production = building.is_production(),
            "deployment triggered"
        );
        Ok(building)
    }

    /// Stop the container of a running deployment and mark it `Stopped`.
    pub async fn stop_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        let deployment = self.get_deployment(id).await?;
        if deployment.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(id.clone()));
        }
        if let Some(container) = deployment.container_id() {
            match self
                .inner
                .runtime
                .stop_container(container, self.inner.defaults.stop_timeout)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_benign_for_teardown() => {}
                Err(e) => return Err(e.into()),
            }
        }
        let saved = modify_deployment(self.inner.deployments.as_ref(), id, |d| {
            d.stop("Stopped by request")
        })
        .await?;
        info!(deployment_id = %id, "deployment stopped");
        Ok(saved)
    }

    /// Cancel a deployment that has not reached `Running`.
    pub async fn cancel_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        let saved = modify_deployment(self.inner.deployments.as_ref(), id, |d| {
            d.cancel("Deployment cancelled")
        })
        .await?;

        if let Some(task) = self.inner.tasks.lock().get(id) {
            task.cancel.cancel();
        }
        if let Some(container) = saved.container_id() {
            self.inner.discard(container).await;
        }
        info!(deployment_id = %id, "deployment cancelled");
        Ok(saved)
    }

    /// Delete a deployment record. Production deployments and deployments
    /// still building or deploying are refused.
    pub async fn delete_deployment(&self, id: &DeploymentId) -> Result<(), DeployError> {
        let deployment = self.get_deployment(id).await?;
        if deployment.is_production() {
            return Err(DeployError::ProductionDeployment(id.clone()));
        }
        if deployment.status().is_in_progress() {
            return Err(DeployError::StillInProgress(id.clone()));
        }

        if let Some(container) = deployment.container_id() {
            let siblings = self
                .inner
                .deployments
                .list_by_application(deployment.application_id())
                .await?;
            let live = siblings.iter().any(|d| {
                d.status() == DeploymentStatus::Running && d.container_id() == Some(container)
            });
            if live {
                debug!(deployment_id = %id, container = %container, "keeping live container");
            } else {
                self.inner.discard(container).await;
            }
        }

        match self.inner.deployments.delete(id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound(_)) => return Err(DeployError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        }
        self.inner.tasks.lock().remove(id);
        info!(deployment_id = %id, "deployment deleted");
        Ok(())
    }

    /// Restart the container of a running deployment. Status is unchanged.
    pub async fn restart_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        let deployment = self.get_deployment(id).await?;
        if deployment.status() != DeploymentStatus::Running {
            return Err(DeployError::NotRunning(id.clone()));
        }
        let container = deployment
            .container_id()
            .ok_or_else(|| DeployError::NoContainer(id.clone()))?;
        self.inner
            .runtime
            .restart_container(container, self.inner.defaults.stop_timeout)
            .await?;
        modify_deployment(self.inner.deployments.as_ref(), id, |d| {
            d.append_deploy_log("Container restarted");
            Ok(())
        })
        .await
    }

    pub async fn get_deployment(&self, id: &DeploymentId) -> Result<Deployment, DeployError> {
        match self.inner.deployments.get(id).await {
            Ok(d) => Ok(d),
            Err(RepositoryError::NotFound(_)) => Err(DeployError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Deployments of an application, newest first.
    pub async fn list_deployments(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<Deployment>, DeployError> {
        Ok(self.inner.deployments.list_by_application(application).await?)
    }

    pub async fn get_deployment_logs(
        &self,
        id: &DeploymentId,
    ) -> Result<DeploymentLogs, DeployError> {
        let deployment = self.get_deployment(id).await?;
        Ok(DeploymentLogs {
            build: deployment.build_log().to_string(),
            deploy: deployment.deploy_log().to_string(),
        })
    }

    /// Whether a background worker is still attached to `id`.
    pub fn is_active(&self, id: &DeploymentId) -> bool {
        self.inner.tasks.lock().contains_key(id)
    }

    /// Wait for the background worker of `id`, if any, to finish.
    pub async fn join(&self, id: &DeploymentId) {
        let handle = self
            .inner
            .tasks
            .lock()
            .get_mut(id)
            .and_then(|task| task.handle.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(deployment_id = %id, error = %e, "deployment worker panicked");
        }
    }
}

impl<R: FullRuntime> Inner<R> {
    fn gate(&self, application: &ApplicationId) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.gates
                .lock()
                .entry(application.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    async fn application(&self, id: &ApplicationId) -> Result<Application, DeployError> {
        match self.applications.get_application(id).await {
            Ok(app) => Ok(app),
            Err(RepositoryError::NotFound(_)) => Err(DeployError::ApplicationNotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn run(
        self: Arc<Self>,
        app: Application,
        deployment: Deployment,
        plan: ImagePlan,
        cancel: CancellationToken,
    ) {
        let id = deployment.id().clone();
        if let Err(e) = self.drive(&app, &deployment, plan, &cancel).await {
            error!(deployment_id = %id, error = %e, "deployment worker could not record progress");
        }
        self.tasks.lock().remove(&id);
    }

    async fn drive(
        &self,
        app: &Application,
        deployment: &Deployment,
        plan: ImagePlan,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let Some(image) = self.image_phase(deployment.id(), plan, cancel).await? else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Ok(());
        }
        self.deploy_phase(app, deployment, image, cancel).await
    }

    /// Building phase. Returns the image once the deployment is `Deploying`.
    async fn image_phase(
        &self,
        id: &DeploymentId,
        plan: ImagePlan,
        cancel: &CancellationToken,
    ) -> Result<Option<ImageRef>, DeployError> {
        let outcome = match plan {
            ImagePlan::Build(request) => {
                let result = match self.builder.build(&request, cancel).await {
                    Ok(result) => result,
                    Err(e) => BuildResult::failed(e.to_string(), String::new()),
                };
                self.record_build(id, result).await?
            }
            ImagePlan::Pull(image) => {
                let pulled = tokio::select! {
                    pulled = self.pull(&image) => pulled,
                    _ = cancel.cancelled() => return Ok(None),
                };
                let header = format!("Pulling image {}", image);
                let result = match pulled {
                    Ok(digest) => BuildResult::succeeded(image, digest, header),
                    Err(e) => BuildResult::failed(e.to_string(), header),
                };
                self.record_build(id, result).await?
            }
            ImagePlan::Reuse {
                image,
                digest,
                from,
            } => {
                let note = format!("Promoting image {} from deployment #{}", image, from);
                self.record_build(id, BuildResult::succeeded(image, digest, note))
                    .await?
            }
        };
        Ok(outcome)
    }

    async fn pull(&self, image: &ImageRef) -> Result<Option<String>, ImageError> {
        if !self.runtime.image_exists(image).await? {
            self.runtime.pull_image(image, None).await?;
        }
        match self.runtime.image_digest(image).await {
            Ok(digest) => Ok(digest),
            Err(e) => {
                warn!(image = %image, error = %e, "could not read image digest");
                Ok(None)
            }
        }
    }

    /// Persist the outcome of the Building phase.
    async fn record_build(
        &self,
        id: &DeploymentId,
        result: BuildResult,
    ) -> Result<Option<ImageRef>, DeployError> {
        let mut moved_on = false;
        modify_deployment(self.deployments.as_ref(), id, |d| {
            d.append_build_log(&result.logs);
            moved_on = d.status() != DeploymentStatus::Building;
            if moved_on {
                return Ok(());
            }
            if let Some(commit) = &result.commit {
                d.set_commit(commit.clone());
            }
            match &result.image {
                Some(image) if result.success => {
                    d.build_succeeded(image.clone(), result.image_digest.clone())
                }
                _ => d.build_failed(result.error.as_deref().unwrap_or("build failed")),
            }
        })
        .await?;

        if moved_on {
            debug!(deployment_id = %id, "deployment left Building before the build finished");
            return Ok(None);
        }
        if result.success {
            info!(deployment_id = %id, "build phase finished");
            Ok(result.image)
        } else {
            warn!(deployment_id = %id, error = ?result.error, "build phase failed");
            Ok(None)
        }
    }

    /// Deploying phase: replace the application's container and start it.
    async fn deploy_phase(
        &self,
        app: &Application,
        deployment: &Deployment,
        image: ImageRef,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let id = deployment.id();
        let name = app.runtime_name(&self.defaults.name_prefix, deployment.is_production());
        let note = format!("Deploying {} as {}", image, name);
        modify_deployment(self.deployments.as_ref(), id, |d| {
            d.append_deploy_log(&note);
            Ok(())
        })
        .await?;

        let staging = format!("{}-{}", name, deployment.number());
        let container = match self
            .start_container(app, deployment, &staging, image, cancel)
            .await
        {
            Ok(Some(container)) => container,
            Ok(None) => return Ok(()),
            Err(e @ DeployError::Repository(_)) => return Err(e),
            Err(e) => {
                let message = e.to_string();
                warn!(deployment_id = %id, error = %message, "deploy phase failed");
                modify_deployment(self.deployments.as_ref(), id, |d| {
                    if d.status() != DeploymentStatus::Deploying {
                        return Ok(());
                    }
                    d.deploy_failed(&message)
                })
                .await?;
                return Ok(());
            }
        };

        let mut moved_on = false;
        let started = format!("Container {} started", container.short(12));
        let saved = modify_deployment(self.deployments.as_ref(), id, |d| {
            moved_on = d.status() != DeploymentStatus::Deploying;
            if moved_on {
                return Ok(());
            }
            d.append_deploy_log(&started);
            d.deploy_succeeded(container.clone())
        })
        .await?;

        if moved_on {
            self.discard(&container).await;
            return Ok(());
        }
        info!(deployment_id = %id, container = %container, "deployment running");
        self.take_slot(&container, &name).await;
        self.supersede(&saved).await;
        Ok(())
    }

    /// Create and start the deployment's container under its staging name.
    /// `None` means the deployment was cancelled along the way. Containers
    /// of earlier deployments are left alone.
    async fn start_container(
        &self,
        app: &Application,
        deployment: &Deployment,
        name: &str,
        image: ImageRef,
        cancel: &CancellationToken,
    ) -> Result<Option<ContainerId>, DeployError> {
        self.clear_name(name, None).await?;

        let mut config = ContainerConfig::new(name, image);
        config.env = app.env.clone();
        config.restart_policy = self.defaults.restart_policy();
        config.labels = HashMap::from([
            (labels::MANAGED.to_string(), "true".to_string()),
            (labels::DEPLOYMENT.to_string(), deployment.id().to_string()),
            (labels::APPLICATION.to_string(), app.id.to_string()),
        ]);
        if let Some(port) = app.port {
            config.ports = vec![PortMapping::tcp(port, None)];
        }

        let container = self.runtime.create_container(&config).await?;
        modify_deployment(self.deployments.as_ref(), deployment.id(), |d| {
            d.attach_container(container.clone());
            Ok(())
        })
        .await?;

        if cancel.is_cancelled() {
            self.discard(&container).await;
            return Ok(None);
        }

        if let Err(e) = self.runtime.start_container(&container).await {
            self.discard(&container).await;
            return Err(e.into());
        }
        Ok(Some(container))
    }

    /// Hand the slot name over to a freshly started container.
    async fn take_slot(&self, container: &ContainerId, name: &str) {
        if let Err(e) = self.clear_name(name, Some(container)).await {
            warn!(
                container = %container,
                name,
                error = %e,
                "could not remove previous container"
            );
            return;
        }
        if let Err(e) = self.runtime.rename_container(container, name).await {
            warn!(container = %container, name, error = %e, "could not rename container");
        }
    }

    /// Remove containers occupying the slot `name`, under that name or a
    /// staging name derived from it, sparing `keep`.
    async fn clear_name(
        &self,
        name: &str,
        keep: Option<&ContainerId>,
    ) -> Result<(), DeployError> {
        let existing = self
            .runtime
            .list_containers(&ContainerFilters::named(name))
            .await?;
        for container in existing
            .into_iter()
            .filter(|c| occupies_slot(&c.name, name) && Some(&c.id) != keep)
        {
            debug!(container = %container.id, name, "removing previous container");
            match self.runtime.remove_container(&container.id, true).await {
                Ok(()) => {}
                Err(e) if e.is_benign_for_teardown() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Mark other running deployments of the same slot as replaced.
    async fn supersede(&self, current: &Deployment) {
        let siblings = match self
            .deployments
            .list_by_application(current.application_id())
            .await
        {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    deployment_id = %current.id(),
                    error = %e,
                    "could not list older deployments"
                );
                return;
            }
        };

        let note = format!("Replaced by deployment #{}", current.number());
        for older in siblings.into_iter().filter(|d| {
            d.id() != current.id()
                && d.is_production() == current.is_production()
                && d.status() == DeploymentStatus::Running
        }) {
            let result = modify_deployment(self.deployments.as_ref(), older.id(), |d| {
                if d.status() != DeploymentStatus::Running {
                    return Ok(());
                }
                d.stop(&note)
            })
            .await;
            if let Err(e) = result {
                warn!(
                    deployment_id = %older.id(),
                    error = %e,
                    "could not mark replaced deployment"
                );
            }
        }
    }

    /// Best-effort stop and removal; failures are only logged.
    async fn discard(&self, container: &ContainerId) {
        if let Err(e) = self.runtime.remove_container(container, true).await
            && !e.is_benign_for_teardown()
        {
            warn!(container = %container, error = %e, "failed to remove container");
        }
    }
}

/// Whether `candidate` is `slot` itself or `slot` with a deployment number
/// appended.
fn occupies_slot(candidate: &str, slot: &str) -> bool {
    match candidate.strip_prefix(slot) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::occupies_slot;

    #[test]
    fn staging_names_belong_to_their_slot() {
        assert!(occupies_slot("mc-app-a1", "mc-app-a1"));
        assert!(occupies_slot("mc-app-a1-7", "mc-app-a1"));
        assert!(!occupies_slot("mc-app-a1-production", "mc-app-a1"));
        assert!(!occupies_slot("mc-app-a10", "mc-app-a1"));
        assert!(!occupies_slot("mc-app-a1-", "mc-app-a1"));
        assert!(occupies_slot("mc-app-a1-production-3", "mc-app-a1-production"));
    }
}
