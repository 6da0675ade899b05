// ABOUTME: Persistence port for database records plus an in-memory implementation.
// ABOUTME: Updates are version-checked like deployments.

use crate::database::error::DatabaseError;
use crate::database::record::{DatabaseRecord, DatabaseStatus};
use crate::store::{MAX_WRITE_ATTEMPTS, RepositoryError};
use crate::types::{DatabaseId, EnvironmentId, ProjectId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[async_trait]
pub trait DatabaseRepository: Send + Sync {
    /// Persist a new record; a second record with the same runtime name is a duplicate.
    async fn create(&self, record: DatabaseRecord) -> Result<DatabaseRecord, RepositoryError>;

    async fn get(&self, id: &DatabaseId) -> Result<DatabaseRecord, RepositoryError>;

    async fn update(&self, record: &DatabaseRecord) -> Result<DatabaseRecord, RepositoryError>;

    async fn delete(&self, id: &DatabaseId) -> Result<(), RepositoryError>;

    async fn list_by_environment(
        &self,
        project: &ProjectId,
        environment: &EnvironmentId,
    ) -> Result<Vec<DatabaseRecord>, RepositoryError>;

    async fn list_by_status(
        &self,
        status: DatabaseStatus,
    ) -> Result<Vec<DatabaseRecord>, RepositoryError>;
}

#[derive(Default)]
pub struct InMemoryDatabaseRepository {
    records: Mutex<HashMap<DatabaseId, DatabaseRecord>>,
}

impl InMemoryDatabaseRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseRepository for InMemoryDatabaseRepository {
    async fn create(&self, record: DatabaseRecord) -> Result<DatabaseRecord, RepositoryError> {
        let mut records = self.records.lock();
        if records
            .values()
            .any(|r| r.runtime_name == record.runtime_name)
        {
            return Err(RepositoryError::Duplicate(record.runtime_name));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &DatabaseId) -> Result<DatabaseRecord, RepositoryError> {
        self.records
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update(&self, record: &DatabaseRecord) -> Result<DatabaseRecord, RepositoryError> {
        let mut records = self.records.lock();
        let stored = records
            .get_mut(&record.id)
            .ok_or_else(|| RepositoryError::NotFound(record.id.to_string()))?;
        if stored.version != record.version {
            return Err(RepositoryError::Conflict {
                id: record.id.to_string(),
                expected: record.version,
                found: stored.version,
            });
        }
        let mut next = record.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn delete(&self, id: &DatabaseId) -> Result<(), RepositoryError> {
        self.records
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn list_by_environment(
        &self,
        project: &ProjectId,
        environment: &EnvironmentId,
    ) -> Result<Vec<DatabaseRecord>, RepositoryError> {
        let mut list: Vec<DatabaseRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| &r.project_id == project && &r.environment_id == environment)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn list_by_status(
        &self,
        status: DatabaseStatus,
    ) -> Result<Vec<DatabaseRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect())
    }
}

/// Read-modify-write a record, retrying on version conflicts.
pub async fn modify_database<F>(
    repo: &dyn DatabaseRepository,
    id: &DatabaseId,
    mut change: F,
) -> Result<DatabaseRecord, DatabaseError>
where
    F: FnMut(&mut DatabaseRecord) + Send,
{
    let mut last_conflict = None;
    for _ in 0..MAX_WRITE_ATTEMPTS {
        let mut record = match repo.get(id).await {
            Ok(r) => r,
            Err(RepositoryError::NotFound(_)) => return Err(DatabaseError::NotFound(id.clone())),
            Err(e) => return Err(e.into()),
        };
        change(&mut record);
        match repo.update(&record).await {
            Ok(saved) => return Ok(saved),
            Err(e) if e.is_conflict() => last_conflict = Some(e),
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
    use crate::database::kind::{DatabaseConfig, DatabaseKind};
    use crate::database::record::NewDatabase;
    use crate::types::ResourceName;

    fn record(name: &str) -> DatabaseRecord {
        DatabaseRecord::new(
            NewDatabase {
                project_id: ProjectId::new("p"),
                environment_id: EnvironmentId::new("e"),
                name: ResourceName::new(name).unwrap(),
                config: DatabaseConfig::defaults(DatabaseKind::Postgresql),
            },
            "mikrocloud",
        )
    }

    #[tokio::test]
    async fn duplicate_names_rejected() {
        let repo = InMemoryDatabaseRepository::new();
        repo.create(record("db")).await.unwrap();
        let err = repo.create(record("db")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(_)));
    }

    #[tokio::test]
    async fn modify_bumps_version() {
        let repo = InMemoryDatabaseRepository::new();
        let created = repo.create(record("db")).await.unwrap();
        let saved = modify_database(&repo, &created.id, |r| {
            r.mark(DatabaseStatus::Running, None)
        })
        .await
        .unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(
            repo.list_by_status(DatabaseStatus::Running).await.unwrap().len(),
            1
        );

        let err = repo.update(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }
}
