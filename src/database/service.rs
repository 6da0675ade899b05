// ABOUTME: Creates and operates database containers on a runtime.
// ABOUTME: Containers are located by deterministic name, then addressed by id.

use crate::config::ContainerDefaults;
use crate::database::error::DatabaseError;
use crate::database::record::DatabaseRecord;
use crate::runtime::{
    ContainerConfig, ContainerError, ContainerFilters, ContainerState, ContainerSummary,
    FullRuntime, LogOptions, LogStreamBox, PortMapping, VolumeMount, labels,
};
use crate::types::ContainerId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseDeployment {
    pub container_id: ContainerId,
    pub container_name: String,
    pub port: u16,
}

/// Observed state of a database container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseContainerStatus {
    pub id: ContainerId,
    pub name: String,
    pub state: ContainerState,
    pub status: String,
    /// Host port the engine port is published on, if any.
    pub host_port: Option<u16>,
}

pub struct DatabaseContainerService<R> {
    runtime: Arc<R>,
    defaults: ContainerDefaults,
}

impl<R> Clone for DatabaseContainerService<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            defaults: self.defaults.clone(),
        }
    }
}

impl<R: FullRuntime> DatabaseContainerService<R> {
    pub fn new(runtime: Arc<R>, defaults: ContainerDefaults) -> Self {
        Self { runtime, defaults }
    }

    /// Full container configuration for `record`.
    pub fn container_config(
        &self,
        record: &DatabaseRecord,
    ) -> Result<ContainerConfig, DatabaseError> {
        let blueprint = record.config.blueprint()?;

        let mut config = ContainerConfig::new(record.runtime_name.clone(), blueprint.image);
        config.env = blueprint.env;
        config.command = blueprint.command;
        config.ports = vec![PortMapping::tcp(blueprint.port, None)];
        config.volumes = vec![VolumeMount::named(record.volume_name(), blueprint.data_dir)];
        config.restart_policy = self.defaults.restart_policy();
        config.labels = HashMap::from([
            (labels::MANAGED.to_string(), "true".to_string()),
            (labels::DATABASE.to_string(), record.id.to_string()),
        ]);
        Ok(config)
    }

    /// Create and start the container. A container that fails to start is
    /// removed before the error is returned.
    pub async fn deploy(
        &self,
        record: &DatabaseRecord,
    ) -> Result<DatabaseDeployment, DatabaseError> {
        let config = self.container_config(record)?;

        if !self.runtime.image_exists(&config.image).await? {
            info!(image = %config.image, "pulling database image");
            self.runtime.pull_image(&config.image, None).await?;
        }

        let id = self.runtime.create_container(&config).await?;
        if let Err(e) = self.runtime.start_container(&id).await {
            if let Err(cleanup) = self.runtime.remove_container(&id, true).await
                && !cleanup.is_benign_for_teardown()
            {
                warn!(
                    container = %id,
                    error = %cleanup,
                    "failed to remove unstartable database container"
                );
            }
            return Err(e.into());
        }

        info!(
            database = %record.id,
            container = %id,
            name = %record.runtime_name,
            "database container started"
        );
        Ok(DatabaseDeployment {
            container_id: id,
            container_name: record.runtime_name.clone(),
            port: record.port,
        })
    }

    pub async fn start(&self, record: &DatabaseRecord) -> Result<ContainerId, DatabaseError> {
        let container = self.find(record).await?;
        match self.runtime.start_container(&container.id).await {
            Ok(()) => {}
            Err(ContainerError::AlreadyRunning(_)) => {
                debug!(container = %container.id, "database container already running");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(container.id)
    }

    pub async fn stop(&self, record: &DatabaseRecord) -> Result<(), DatabaseError> {
        let container = self.find(record).await?;
        match self
            .runtime
            .stop_container(&container.id, self.defaults.stop_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_benign_for_teardown() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop, then remove the container.
    pub async fn remove(&self, record: &DatabaseRecord) -> Result<(), DatabaseError> {
        let container = self.find(record).await?;
        if let Err(e) = self
            .runtime
            .stop_container(&container.id, self.defaults.stop_timeout)
            .await
            && !e.is_benign_for_teardown()
        {
            warn!(container = %container.id, error = %e, "stop before removal failed");
        }
        match self.runtime.remove_container(&container.id, true).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_benign_for_teardown() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn status(
        &self,
        record: &DatabaseRecord,
    ) -> Result<DatabaseContainerStatus, DatabaseError> {
        let container = self.find(record).await?;
        let info = self.runtime.inspect_container(&container.id).await?;
        let host_port = info
            .ports
            .iter()
            .find(|p| p.container_port == record.port)
            .and_then(|p| p.host_port);
        Ok(DatabaseContainerStatus {
            id: info.id,
            name: info.name,
            state: info.state,
            status: info.status,
            host_port,
        })
    }

    pub async fn logs(
        &self,
        record: &DatabaseRecord,
        follow: bool,
    ) -> Result<LogStreamBox, DatabaseError> {
        let container = self.find(record).await?;
        Ok(self
            .runtime
            .container_logs(&container.id, &LogOptions::all(follow))
            .await?)
    }

    /// Tail of the container's output so far.
    pub async fn recent_logs(
        &self,
        record: &DatabaseRecord,
        tail: u64,
    ) -> Result<LogStreamBox, DatabaseError> {
        let container = self.find(record).await?;
        Ok(self
            .runtime
            .container_logs(&container.id, &LogOptions::tail(tail))
            .await?)
    }

    /// The container holding the record's runtime name.
    pub async fn find(&self, record: &DatabaseRecord) -> Result<ContainerSummary, DatabaseError> {
        self.runtime
            .list_containers(&ContainerFilters::named(&record.runtime_name))
            .await?
            .into_iter()
            .find(|c| c.name == record.runtime_name)
            .ok_or_else(|| DatabaseError::ContainerNotFound(record.runtime_name.clone()))
    }
}
