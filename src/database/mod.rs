// ABOUTME: Stateful service containers: databases and key-value caches.
// ABOUTME: Kind defaults, records, the container service, and the id-based manager.

mod error;
mod kind;
mod manager;
mod record;
mod repository;
mod service;

pub use error::DatabaseError;
pub use kind::{
    Blueprint, ClickhouseConfig, DatabaseConfig, DatabaseKind, KeyValueConfig, MongoConfig,
    MysqlConfig, PostgresConfig,
};
pub use manager::{DatabaseManager, DatabaseStatusReport};
pub use record::{DatabaseRecord, DatabaseStatus, NewDatabase, runtime_name};
pub use repository::{DatabaseRepository, InMemoryDatabaseRepository, modify_database};
pub use service::{DatabaseContainerService, DatabaseContainerStatus, DatabaseDeployment};
