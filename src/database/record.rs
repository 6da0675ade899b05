// ABOUTME: Persisted record of a stateful service container.
// ABOUTME: Its runtime name derives only from project, environment, and declared name.

use crate::database::kind::{DatabaseConfig, DatabaseKind};
use crate::types::{ContainerId, DatabaseId, EnvironmentId, ProjectId, ResourceName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Created,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Request to provision a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDatabase {
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub name: ResourceName,
    pub config: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRecord {
    pub id: DatabaseId,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub name: ResourceName,
    pub config: DatabaseConfig,
    /// Deterministic container name, also the host in the connection string.
    pub runtime_name: String,
    pub connection_string: String,
    /// Port the engine listens on inside the container.
    pub port: u16,
    pub status: DatabaseStatus,
    pub container_id: Option<ContainerId>,
    /// Why the last operation left the database `Failed`.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// `<prefix>-<project>-<environment>-<name>`.
pub fn runtime_name(
    prefix: &str,
    project: &ProjectId,
    environment: &EnvironmentId,
    name: &ResourceName,
) -> String {
    format!("{}-{}-{}-{}", prefix, project, environment, name.as_str())
}

impl DatabaseRecord {
    pub fn new(new: NewDatabase, prefix: &str) -> Self {
        let runtime_name = runtime_name(prefix, &new.project_id, &new.environment_id, &new.name);
        let connection_string = new.config.connection_string(&runtime_name);
        let now = Utc::now();
        Self {
            id: DatabaseId::generate(),
            port: new.config.kind().port(),
            project_id: new.project_id,
            environment_id: new.environment_id,
            name: new.name,
            config: new.config,
            runtime_name,
            connection_string,
            status: DatabaseStatus::Created,
            container_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn kind(&self) -> DatabaseKind {
        self.config.kind()
    }

    /// Named volume holding the database's data.
    pub fn volume_name(&self) -> String {
        format!("{}-data", self.runtime_name)
    }

    pub fn mark(&mut self, status: DatabaseStatus, error: Option<String>) {
        self.status = status;
        self.last_error = error;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_connection_string_are_derived() {
        let record = DatabaseRecord::new(
            NewDatabase {
                project_id: ProjectId::new("p1"),
                environment_id: EnvironmentId::new("prod"),
                name: ResourceName::new("orders").unwrap(),
                config: DatabaseConfig::defaults(DatabaseKind::Redis),
            },
            "mikrocloud",
        );
        assert_eq!(record.runtime_name, "mikrocloud-p1-prod-orders");
        assert_eq!(record.volume_name(), "mikrocloud-p1-prod-orders-data");
        assert!(
            record
                .connection_string
                .ends_with("@mikrocloud-p1-prod-orders:6379")
        );
        assert_eq!(record.status, DatabaseStatus::Created);
    }
}
