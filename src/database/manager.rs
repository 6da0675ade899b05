// ABOUTME: Id-based database operations over the record repository.
// ABOUTME: Provisioning persists a Created record and deploys it in the background.

use crate::config::ContainerDefaults;
use crate::database::error::DatabaseError;
use crate::database::record::{DatabaseRecord, DatabaseStatus, NewDatabase};
use crate::database::repository::{DatabaseRepository, modify_database};
use crate::database::service::{DatabaseContainerService, DatabaseContainerStatus};
use crate::runtime::{FullRuntime, LogStreamBox, collect_logs};
use crate::store::RepositoryError;
use crate::types::{DatabaseId, EnvironmentId, ProjectId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Persisted record alongside what the runtime reports.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatusReport {
    pub record: DatabaseRecord,
    /// `None` when no container holds the record's name.
    pub container: Option<DatabaseContainerStatus>,
}

struct Inner<R> {
    service: DatabaseContainerService<R>,
    repo: Arc<dyn DatabaseRepository>,
    name_prefix: String,
    tasks: Mutex<HashMap<DatabaseId, JoinHandle<()>>>,
}

pub struct DatabaseManager<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for DatabaseManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: FullRuntime> DatabaseManager<R> {
    pub fn new(
        runtime: Arc<R>,
        repo: Arc<dyn DatabaseRepository>,
        defaults: ContainerDefaults,
    ) -> Self {
        let name_prefix = defaults.name_prefix.clone();
        Self {
            inner: Arc::new(Inner {
                service: DatabaseContainerService::new(runtime, defaults),
                repo,
                name_prefix,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn service(&self) -> &DatabaseContainerService<R> {
        &self.inner.service
    }

    /// Persist a new database in `Created` and deploy it in the background.
    pub async fn provision(&self, new: NewDatabase) -> Result<DatabaseRecord, DatabaseError> {
        new.config.validate()?;
        let record = DatabaseRecord::new(new, &self.inner.name_prefix);
        let record = match self.inner.repo.create(record).await {
            Ok(r) => r,
            Err(RepositoryError::Duplicate(name)) => return Err(DatabaseError::AlreadyExists(name)),
            Err(e) => return Err(e.into()),
        };

        let inner = Arc::clone(&self.inner);
        let worker = record.clone();
        let handle = tokio::spawn(async move { inner.deploy(worker).await });
        self.inner.tasks.lock().insert(record.id.clone(), handle);

        info!(
            database = %record.id,
            kind = %record.kind(),
            name = %record.runtime_name,
            "database provisioning started"
        );
        Ok(record)
    }

    pub async fn start(&self, id: &DatabaseId) -> Result<DatabaseRecord, DatabaseError> {
        self.join(id).await;
        let record = self.get(id).await?;
        let container = self.inner.service.start(&record).await?;
        modify_database(self.inner.repo.as_ref(), id, |r| {
            r.container_id = Some(container.clone());
            r.mark(DatabaseStatus::Running, None);
        })
        .await
    }

    pub async fn stop(&self, id: &DatabaseId) -> Result<DatabaseRecord, DatabaseError> {
        self.join(id).await;
        let record = self.get(id).await?;
        self.inner.service.stop(&record).await?;
        modify_database(self.inner.repo.as_ref(), id, |r| {
            r.mark(DatabaseStatus::Stopped, None)
        })
        .await
    }

    /// Remove the container, then the record. The record stays when the
    /// container could not be confirmed gone. Waits out any provisioning
    /// still in flight so its container cannot outlive the record.
    pub async fn remove(&self, id: &DatabaseId) -> Result<(), DatabaseError> {
        self.join(id).await;
        let record = self.get(id).await?;
        match self.inner.service.remove(&record).await {
            Ok(()) => {}
            Err(e) if e.is_container_missing() => {
                warn!(database = %id, "database container already gone");
            }
            Err(e) => return Err(e),
        }
        match self.inner.repo.delete(id).await {
            Ok(()) | Err(RepositoryError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        info!(database = %id, "database removed");
        Ok(())
    }

    pub async fn status(&self, id: &DatabaseId) -> Result<DatabaseStatusReport, DatabaseError> {
        let record = self.get(id).await?;
        let container = match self.inner.service.status(&record).await {
            Ok(status) => Some(status),
            Err(e) if e.is_container_missing() => None,
            Err(e) => return Err(e),
        };
        Ok(DatabaseStatusReport { record, container })
    }

    /// Output written so far; the last `tail` lines when given.
    pub async fn logs(&self, id: &DatabaseId, tail: Option<u64>) -> Result<String, DatabaseError> {
        let record = self.get(id).await?;
        let stream = match tail {
            Some(n) => self.inner.service.recent_logs(&record, n).await?,
            None => self.inner.service.logs(&record, false).await?,
        };
        Ok(collect_logs(stream).await?)
    }

    /// Live log stream until the container stops.
    pub async fn follow_logs(&self, id: &DatabaseId) -> Result<LogStreamBox, DatabaseError> {
        let record = self.get(id).await?;
        self.inner.service.logs(&record, true).await
    }

    pub async fn get(&self, id: &DatabaseId) -> Result<DatabaseRecord, DatabaseError> {
        match self.inner.repo.get(id).await {
            Ok(record) => Ok(record),
            Err(RepositoryError::NotFound(_)) => Err(DatabaseError::NotFound(id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(
        &self,
        project: &ProjectId,
        environment: &EnvironmentId,
    ) -> Result<Vec<DatabaseRecord>, DatabaseError> {
        Ok(self.inner.repo.list_by_environment(project, environment).await?)
    }

    /// Wait for a background provisioning task, if one is running.
    pub async fn join(&self, id: &DatabaseId) {
        let handle = self.inner.tasks.lock().remove(id);
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(database = %id, error = %e, "provisioning task panicked");
        }
    }
}

impl<R: FullRuntime> Inner<R> {
    async fn deploy(self: Arc<Self>, record: DatabaseRecord) {
        let id = record.id.clone();
        let outcome = self.service.deploy(&record).await;

        let result = match &outcome {
            Ok(deployed) => {
                modify_database(self.repo.as_ref(), &id, |r| {
                    r.container_id = Some(deployed.container_id.clone());
                    r.mark(DatabaseStatus::Running, None);
                })
                .await
            }
            Err(e) => {
                let message = e.to_string();
                warn!(database = %id, error = %message, "database deployment failed");
                modify_database(self.repo.as_ref(), &id, |r| {
                    r.mark(DatabaseStatus::Failed, Some(message.clone()))
                })
                .await
            }
        };
        match result {
            Ok(_) => {}
            Err(DatabaseError::NotFound(_)) => {
                warn!(database = %id, "database removed while provisioning");
                if outcome.is_ok()
                    && let Err(e) = self.service.remove(&record).await
                    && !e.is_container_missing()
                {
                    warn!(database = %id, error = %e, "could not remove orphaned container");
                }
            }
            Err(e) => {
                warn!(database = %id, error = %e, "could not record provisioning outcome");
            }
        }
        self.tasks.lock().remove(&id);
    }
}
