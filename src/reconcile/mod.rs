// ABOUTME: Periodic loop correcting persisted status from what the runtime reports.
// ABOUTME: Only Running records are corrected; terminal states are never revived.

use crate::database::{DatabaseRecord, DatabaseRepository, DatabaseStatus, modify_database};
use crate::deploy::{Deployment, DeploymentRepository, DeploymentStatus, modify_deployment};
use crate::runtime::{
    ContainerError, ContainerFilters, ContainerState, ContainerSummary, FullRuntime, labels,
};
use crate::store::RepositoryError;
use crate::types::{DatabaseId, DeploymentId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to list containers: {0}")]
    Runtime(#[from] ContainerError),

    #[error("failed to read records: {0}")]
    Repository(#[from] RepositoryError),
}

/// What one tick observed and changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub containers_seen: usize,
    pub deployments_checked: usize,
    pub deployments_stopped: usize,
    pub databases_checked: usize,
    pub databases_stopped: usize,
    pub databases_failed: usize,
    /// Live containers whose record does not say Running. Logged only.
    pub inconsistencies: usize,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.deployments_stopped + self.databases_stopped + self.databases_failed > 0
    }
}

pub struct StatusReconciler<R> {
    runtime: Arc<R>,
    deployments: Arc<dyn DeploymentRepository>,
    databases: Arc<dyn DatabaseRepository>,
    interval: Duration,
}

impl<R: FullRuntime> StatusReconciler<R> {
    pub fn new(
        runtime: Arc<R>,
        deployments: Arc<dyn DeploymentRepository>,
        databases: Arc<dyn DatabaseRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            deployments,
            databases,
            interval,
        }
    }

    /// Run ticks every interval until `cancel` fires. Failed ticks are logged
    /// and skipped.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval = ?self.interval, "status reconciler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match self.tick().await {
                    Ok(report) if report.changed() => info!(?report, "reconciled status"),
                    Ok(report) => debug!(?report, "status consistent"),
                    Err(e) => warn!(error = %e, "reconcile tick skipped"),
                },
            }
        }
        info!("status reconciler stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// One pass over all containers and Running records.
    pub async fn tick(&self) -> Result<ReconcileReport, ReconcileError> {
        let containers = self
            .runtime
            .list_containers(&ContainerFilters::everything())
            .await?;
        let running_deployments = self
            .deployments
            .list_by_status(DeploymentStatus::Running)
            .await?;
        let running_databases = self
            .databases
            .list_by_status(DatabaseStatus::Running)
            .await?;

        let by_id: HashMap<&str, &ContainerSummary> =
            containers.iter().map(|c| (c.id.as_str(), c)).collect();
        let by_name: HashMap<&str, &ContainerSummary> =
            containers.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut report = ReconcileReport {
            containers_seen: containers.len(),
            deployments_checked: running_deployments.len(),
            databases_checked: running_databases.len(),
            ..Default::default()
        };

        for deployment in &running_deployments {
            let observed = deployment
                .container_id()
                .and_then(|c| by_id.get(c.as_str()).copied());
            if let Some(reason) = gone(observed)
                && self.stop_deployment(deployment, &reason).await
            {
                report.deployments_stopped += 1;
            }
        }

        for record in &running_databases {
            let observed = record
                .container_id
                .as_ref()
                .and_then(|c| by_id.get(c.as_str()).copied())
                .or_else(|| by_name.get(record.runtime_name.as_str()).copied());
            let Some(reason) = gone(observed) else {
                continue;
            };
            let status = match observed.map(|c| c.state) {
                Some(ContainerState::Exited | ContainerState::Created) => DatabaseStatus::Stopped,
                _ => DatabaseStatus::Failed,
            };
            if self.settle_database(record, status, &reason).await {
                match status {
                    DatabaseStatus::Stopped => report.databases_stopped += 1,
                    _ => report.databases_failed += 1,
                }
            }
        }

        for container in containers.iter().filter(|c| is_managed_and_live(c)) {
            if self.is_inconsistent(container).await {
                report.inconsistencies += 1;
            }
        }

        Ok(report)
    }

    async fn stop_deployment(&self, deployment: &Deployment, reason: &str) -> bool {
        let note = format!("Reconciled: {}", reason);
        let mut applied = false;
        let result = modify_deployment(self.deployments.as_ref(), deployment.id(), |d| {
            applied = d.status() == DeploymentStatus::Running;
            if !applied {
                return Ok(());
            }
            d.stop(&note)
        })
        .await;
        match result {
            Ok(_) if applied => {
                info!(
                    deployment_id = %deployment.id(),
                    reason,
                    "running deployment marked stopped"
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(
                    deployment_id = %deployment.id(),
                    error = %e,
                    "could not reconcile deployment"
                );
                false
            }
        }
    }

    async fn settle_database(
        &self,
        record: &DatabaseRecord,
        status: DatabaseStatus,
        reason: &str,
    ) -> bool {
        let mut applied = false;
        let result = modify_database(self.databases.as_ref(), &record.id, |r| {
            applied = r.status == DatabaseStatus::Running;
            if applied {
                r.mark(status, Some(reason.to_string()));
            }
        })
        .await;
        match result {
            Ok(_) if applied => {
                info!(database = %record.id, %status, reason, "running database corrected");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(database = %record.id, error = %e, "could not reconcile database");
                false
            }
        }
    }

    async fn is_inconsistent(&self, container: &ContainerSummary) -> bool {
        if let Some(id) = container.labels.get(labels::DEPLOYMENT) {
            let id = DeploymentId::new(id.as_str());
            return match self.deployments.get(&id).await {
                Ok(d) if d.status() == DeploymentStatus::Running || d.status().is_in_progress() => {
                    false
                }
                Ok(d) => {
                    warn!(
                        container = %container.id,
                        deployment_id = %id,
                        status = %d.status(),
                        "container running for a deployment that is not"
                    );
                    true
                }
                Err(RepositoryError::NotFound(_)) => {
                    warn!(
                        container = %container.id,
                        deployment_id = %id,
                        "container running for an unknown deployment"
                    );
                    true
                }
                Err(e) => {
                    debug!(container = %container.id, error = %e, "could not check deployment");
                    false
                }
            };
        }
        if let Some(id) = container.labels.get(labels::DATABASE) {
            let id = DatabaseId::new(id.as_str());
            return match self.databases.get(&id).await {
                Ok(r) if matches!(r.status, DatabaseStatus::Running | DatabaseStatus::Created) => {
                    false
                }
                Ok(r) => {
                    warn!(
                        container = %container.id,
                        database = %id,
                        status = %r.status,
                        "container running for a database that is not"
                    );
                    true
                }
                Err(RepositoryError::NotFound(_)) => {
                    warn!(
                        container = %container.id,
                        database = %id,
                        "container running for an unknown database"
                    );
                    true
                }
                Err(e) => {
                    debug!(container = %container.id, error = %e, "could not check database");
                    false
                }
            };
        }
        false
    }
}

/// Why an observed container no longer backs a Running record, if it does not.
fn gone(observed: Option<&ContainerSummary>) -> Option<String> {
    match observed {
        None => Some("container no longer exists".to_string()),
        Some(c) if c.state.is_live() => None,
        Some(c) => Some(format!("container is {}", c.state)),
    }
}

fn is_managed_and_live(container: &ContainerSummary) -> bool {
    container.state.is_live()
        && container.labels.get(labels::MANAGED).map(String::as_str) == Some("true")
        && container.labels.get(labels::ROLE).map(String::as_str) != Some("builder")
}
