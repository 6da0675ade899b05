// ABOUTME: Test support utilities.
// ABOUTME: Fake source fetcher, sample applications, and a lifecycle wired to MemoryRuntime.

// Each test binary only uses some of these helpers, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use mikrocloud::build::{
    BuildConfig, BuildOrchestrator, BuildSettings, CommitInfo, DockerfileConfig, SourceError,
    SourceFetcher, SourceLocation, StaticSiteConfig, StrategyKind,
};
use mikrocloud::config::ContainerDefaults;
use mikrocloud::deploy::{
    Application, DeploymentLifecycle, DeploymentSource, InMemoryApplicationCatalog,
    InMemoryDeploymentRepository,
};
use mikrocloud::runtime::MemoryRuntime;
use mikrocloud::types::{ApplicationId, EnvironmentId, ImageRef, ProjectId, ResourceName};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tokio::sync::Notify;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("mikrocloud=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const COMMIT: &str = "4f2a9c1e0b7d3a6f5e8c2b1a0d9e8f7c6b5a4d3e";

/// Writes a fixed file tree instead of cloning. With `hold` set, the fetch
/// blocks until the notify fires.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    files: Vec<(PathBuf, String)>,
    hold: Option<Arc<Notify>>,
}

impl FakeFetcher {
    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.push((PathBuf::from(path), contents.to_string()));
        self
    }

    pub fn dockerfile() -> Self {
        Self::default().with_file("Dockerfile", "FROM alpine:3\nCMD [\"sleep\", \"infinity\"]\n")
    }

    /// Fetches that wait for `release` before returning.
    pub fn held(mut self, release: Arc<Notify>) -> Self {
        self.hold = Some(release);
        self
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, source: &SourceLocation, dest: &Path) -> Result<CommitInfo, SourceError> {
        if let Some(release) = &self.hold {
            release.notified().await;
        }
        tokio::fs::create_dir_all(dest).await?;
        for (path, contents) in &self.files {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(target, contents).await?;
        }
        Ok(CommitInfo {
            hash: Some(COMMIT.to_string()),
            author: Some("Test Author".to_string()),
            message: Some("initial commit".to_string()),
            branch: Some(source.reference.clone()),
        })
    }
}

fn app(name: &str, source: DeploymentSource, build: BuildSettings) -> Application {
    Application {
        id: ApplicationId::new(format!("app-{}", name)),
        project_id: ProjectId::new("proj"),
        environment_id: EnvironmentId::new("prod"),
        name: ResourceName::new(name).unwrap(),
        source,
        build,
        env: HashMap::from([("APP_ENV".to_string(), "test".to_string())]),
        port: Some(8080),
    }
}

fn git() -> DeploymentSource {
    DeploymentSource::Git(SourceLocation::new("https://git.example.com/acme/web.git", "main"))
}

pub fn dockerfile_app(name: &str) -> Application {
    let mut build = BuildSettings::bare(StrategyKind::Dockerfile);
    build.dockerfile = Some(DockerfileConfig::default());
    app(name, git(), build)
}

pub fn static_app(name: &str, build_command: &str) -> Application {
    let mut build = BuildSettings::bare(StrategyKind::StaticSite);
    build.static_site = Some(StaticSiteConfig {
        build_command: build_command.to_string(),
        output_dir: "dist".to_string(),
        nginx_config: None,
    });
    app(name, git(), build)
}

pub fn registry_app(name: &str, image: &str) -> Application {
    app(
        name,
        DeploymentSource::Registry {
            image: ImageRef::parse(image).unwrap(),
        },
        BuildSettings::bare(StrategyKind::Dockerfile),
    )
}

/// A lifecycle over MemoryRuntime and in-memory stores.
pub struct Harness {
    pub runtime: Arc<MemoryRuntime>,
    pub deployments: Arc<InMemoryDeploymentRepository>,
    pub applications: Arc<InMemoryApplicationCatalog>,
    pub lifecycle: DeploymentLifecycle<MemoryRuntime>,
    _workspace: TempDir,
}

impl Harness {
    pub fn new(fetcher: FakeFetcher) -> Self {
        init_tracing();
        let workspace = tempfile::tempdir().unwrap();
        let runtime = Arc::new(MemoryRuntime::new());
        let deployments = Arc::new(InMemoryDeploymentRepository::new());
        let applications = Arc::new(InMemoryApplicationCatalog::new());

        let build = BuildConfig {
            workspace_root: workspace.path().join("builds"),
            ..BuildConfig::default()
        };
        let builder = BuildOrchestrator::new(Arc::clone(&runtime), Arc::new(fetcher), build);
        let lifecycle = DeploymentLifecycle::new(
            Arc::clone(&runtime),
            builder,
            deployments.clone(),
            applications.clone(),
            ContainerDefaults::default(),
        );

        Self {
            runtime,
            deployments,
            applications,
            lifecycle,
            _workspace: workspace,
        }
    }

    pub fn add(&self, app: &Application) {
        self.applications.insert(app.clone());
    }
}
