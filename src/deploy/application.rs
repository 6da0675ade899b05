// ABOUTME: The application record consumed by the deployment lifecycle.
// ABOUTME: ApplicationCatalog is the read-only port the outer layer implements.

use crate::build::{BuildSettings, SourceLocation};
use crate::store::RepositoryError;
use crate::types::{
    ApplicationId, EnvironmentId, ImageRef, ParseImageRefError, ProjectId, ResourceName, slugify,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where an application's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeploymentSource {
    /// Built from a repository on every deployment.
    Git(SourceLocation),
    /// Pulled as-is; no build.
    Registry { image: ImageRef },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub project_id: ProjectId,
    pub environment_id: EnvironmentId,
    pub name: ResourceName,
    pub source: DeploymentSource,
    pub build: BuildSettings,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Port the application listens on inside its container.
    #[serde(default)]
    pub port: Option<u16>,
}

impl Application {
    /// Deterministic container name for this application's live container.
    pub fn runtime_name(&self, prefix: &str, production: bool) -> String {
        let base = format!("{}-app-{}", prefix, self.id);
        if production {
            format!("{}-production", base)
        } else {
            base
        }
    }

    /// Tag the image of deployment `number` is built into. The repository
    /// is keyed on the application id; names repeat across projects.
    pub fn image_tag(&self, number: u64) -> Result<ImageRef, ParseImageRefError> {
        ImageRef::tagged(
            &format!("mikrocloud/{}", slugify(self.id.as_str())),
            &format!("deploy-{}", number),
        )
    }
}

/// Read access to application records.
#[async_trait]
pub trait ApplicationCatalog: Send + Sync {
    async fn get_application(&self, id: &ApplicationId) -> Result<Application, RepositoryError>;
}

/// Catalog held in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryApplicationCatalog {
    apps: RwLock<HashMap<ApplicationId, Application>>,
}

impl InMemoryApplicationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an application.
    pub fn insert(&self, app: Application) {
        self.apps.write().insert(app.id.clone(), app);
    }

    pub fn remove(&self, id: &ApplicationId) -> Option<Application> {
        self.apps.write().remove(id)
    }
}

#[async_trait]
impl ApplicationCatalog for InMemoryApplicationCatalog {
    async fn get_application(&self, id: &ApplicationId) -> Result<Application, RepositoryError> {
        self.apps
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::StrategyKind;

    fn app() -> Application {
        Application {
            id: ApplicationId::new("a1"),
            project_id: ProjectId::new("p1"),
            environment_id: EnvironmentId::new("e1"),
            name: ResourceName::new("web").unwrap(),
            source: DeploymentSource::Registry {
                image: ImageRef::parse("nginx:alpine").unwrap(),
            },
            build: BuildSettings::bare(StrategyKind::Dockerfile),
            env: HashMap::new(),
            port: Some(80),
        }
    }

    #[test]
    fn production_container_has_its_own_name() {
        let app = app();
        assert_eq!(app.runtime_name("mikrocloud", false), "mikrocloud-app-a1");
        assert_eq!(
            app.runtime_name("mikrocloud", true),
            "mikrocloud-app-a1-production"
        );
    }

    #[test]
    fn image_tag_carries_deployment_number() {
        assert_eq!(app().image_tag(3).unwrap().to_string(), "mikrocloud/a1:deploy-3");
    }

    #[test]
    fn same_name_in_another_project_gets_its_own_image() {
        let first = app();
        let second = Application {
            id: ApplicationId::new("B2"),
            project_id: ProjectId::new("p2"),
            ..app()
        };
        assert_eq!(first.name, second.name);
        assert_ne!(first.image_tag(1).unwrap(), second.image_tag(1).unwrap());
        assert_eq!(second.image_tag(1).unwrap().to_string(), "mikrocloud/b2:deploy-1");
    }

    #[tokio::test]
    async fn missing_application_is_not_found() {
        let catalog = InMemoryApplicationCatalog::new();
        let err = catalog
            .get_application(&ApplicationId::new("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
