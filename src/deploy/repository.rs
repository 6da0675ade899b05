// ABOUTME: Persistence port for deployments plus an in-memory implementation.
// ABOUTME: Numbers are assigned at creation; updates are version-checked.

use crate::deploy::deployment::{Deployment, NewDeployment};
use crate::deploy::error::DeployError;
use crate::deploy::state::DeploymentStatus;
use crate::store::{MAX_WRITE_ATTEMPTS, RepositoryError};
use crate::types::{ApplicationId, DeploymentId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Persist a new deployment, assigning the next number for its
    /// application in the same atomic step. Numbers are never reused.
    async fn create(&self, new: NewDeployment) -> Result<Deployment, RepositoryError>;

    async fn get(&self, id: &DeploymentId) -> Result<Deployment, RepositoryError>;

    /// Store `deployment` if its version matches the stored one; returns the
    /// stored copy with the bumped version.
    async fn update(&self, deployment: &Deployment) -> Result<Deployment, RepositoryError>;

    async fn delete(&self, id: &DeploymentId) -> Result<(), RepositoryError>;

    /// All deployments of an application, newest first.
    async fn list_by_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<Deployment>, RepositoryError>;

    /// The highest-numbered deployment of an application.
    async fn latest_by_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<Deployment>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, RepositoryError>;
}

#[derive(Default)]
struct Rows {
    deployments: HashMap<DeploymentId, Deployment>,
    /// Last number handed out per application; survives deletions.
    counters: HashMap<ApplicationId, u64>,
}

#[derive(Default)]
pub struct InMemoryDeploymentRepository {
    rows: Mutex<Rows>,
}

impl InMemoryDeploymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryDeploymentRepository {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, RepositoryError> {
        let mut rows = self.rows.lock();
        let counter = rows
            .counters
            .entry(new.application_id.clone())
            .or_insert(0);
        *counter += 1;
        let deployment = new.into_deployment(*counter);
        rows.deployments
            .insert(deployment.id().clone(), deployment.clone());
        Ok(deployment)
    }

    async fn get(&self, id: &DeploymentId) -> Result<Deployment, RepositoryError> {
        self.rows
            .lock()
            .deployments
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update(&self, deployment: &Deployment) -> Result<Deployment, RepositoryError> {
        let mut rows = self.rows.lock();
        let stored = rows
            .deployments
            .get_mut(deployment.id())
            .ok_or_else(|| RepositoryError::NotFound(deployment.id().to_string()))?;
        if stored.version() != deployment.version() {
            return Err(RepositoryError::Conflict {
                id: deployment.id().to_string(),
                expected: deployment.version(),
                found: stored.version(),
            });
        }
        let mut next = deployment.clone();
        next.set_version(deployment.version() + 1);
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: &DeploymentId) -> Result<(), RepositoryError> {
        self.rows
            .lock()
            .deployments
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_by_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Vec<Deployment>, RepositoryError> {
        let mut list: Vec<Deployment> = self
            .rows
            .lock()
            .deployments
            .values()
            .filter(|d| d.application_id() == application)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.number().cmp(&a.number()));
        Ok(list)
    }

    async fn latest_by_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<Deployment>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .deployments
            .values()
            .filter(|d| d.application_id() == application)
            .max_by_key(|d| d.number())
            .cloned())
    }

    async fn list_by_status(
        &self,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .deployments
            .values()
            .filter(|d| d.status() == status)
            .cloned()
            .collect())
    }
}

/// Read-modify-write a deployment, retrying when another writer got there first.
///
/// `change` runs against the freshest copy on every attempt and may reject it.
pub async fn modify_deployment<F>(
    repo: &dyn DeploymentRepository,
    id: &DeploymentId,
    mut change: F,
) -> Result<Deployment, DeployError>
where
    F: FnMut(&mut Deployment) -> Result<(), DeployError> + Send,
{
    let mut last_conflict = None;
    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut deployment = match repo.get(id).await {
            Ok(d) => d,
            Err(RepositoryError::NotFound(_)) => return Err(DeployError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };
        change(&mut deployment)?;
        match repo.update(&deployment).await {
            Ok(saved) => return Ok(saved),
            Err(e) if e.is_conflict() => last_conflict = Some(e),
            Err(RepositoryError::NotFound(_)) => return Err(DeployError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_conflict
        .unwrap_or_else(|| RepositoryError::Backend("no write attempts made".to_string()))
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::deployment::Trigger;

    fn new(app: &str) -> NewDeployment {
        NewDeployment::new(ApplicationId::new(app), Trigger::push())
    }

    #[tokio::test]
    async fn numbers_are_per_application_and_never_reused() {
        let repo = InMemoryDeploymentRepository::new();
        let a1 = repo.create(new("a")).await.unwrap();
        let a2 = repo.create(new("a")).await.unwrap();
        let b1 = repo.create(new("b")).await.unwrap();
        assert_eq!((a1.number(), a2.number(), b1.number()), (1, 2, 1));

        repo.delete(a2.id()).await.unwrap();
        let a3 = repo.create(new("a")).await.unwrap();
        assert_eq!(a3.number(), 3);
    }

    #[tokio::test]
    async fn stale_update_is_a_conflict() {
        let repo = InMemoryDeploymentRepository::new();
        let d = repo.create(new("a")).await.unwrap();

        let mut first = d.clone();
        first.append_build_log("first");
        repo.update(&first).await.unwrap();

        let mut second = d;
        second.append_build_log("second");
        let err = repo.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn modify_applies_to_latest_copy() {
        let repo = InMemoryDeploymentRepository::new();
        let d = repo.create(new("a")).await.unwrap();
        modify_deployment(&repo, d.id(), |d| {
            d.append_build_log("one");
            Ok(())
        })
        .await
        .unwrap();
        let saved = modify_deployment(&repo, d.id(), |d| {
            d.append_build_log("two");
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(saved.build_log(), "one\ntwo\n");
        assert_eq!(saved.version(), 2);
    }

    #[tokio::test]
    async fn latest_is_highest_number() {
        let repo = InMemoryDeploymentRepository::new();
        repo.create(new("a")).await.unwrap();
        let second = repo.create(new("a")).await.unwrap();
        let latest = repo
            .latest_by_application(&ApplicationId::new("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id(), second.id());
    }
}
