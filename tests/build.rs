// ABOUTME: Integration tests for the build orchestrator over MemoryRuntime.
// ABOUTME: Each strategy runs its builder containers against a fake checkout.

mod support;

use mikrocloud::build::{
    BuildConfig, BuildError, BuildOrchestrator, BuildRequest, BuildStrategy, DockerfileConfig,
    SourceLocation,
};
use mikrocloud::runtime::{FailOn, MemoryRuntime, ScriptedRun};
use mikrocloud::types::ImageRef;
use std::collections::HashMap;
use std::sync::Arc;
use support::FakeFetcher;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn orchestrator(
    fetcher: FakeFetcher,
) -> (Arc<MemoryRuntime>, BuildOrchestrator<MemoryRuntime>, TempDir) {
    support::init_tracing();
    let workspace = tempfile::tempdir().unwrap();
    let runtime = Arc::new(MemoryRuntime::new());
    let config = BuildConfig {
        workspace_root: workspace.path().to_path_buf(),
        ..BuildConfig::default()
    };
    let orchestrator = BuildOrchestrator::new(Arc::clone(&runtime), Arc::new(fetcher), config);
    (runtime, orchestrator, workspace)
}

fn request(yaml: &str) -> BuildRequest {
    serde_yaml::from_str(yaml).expect("request should parse")
}

/// Test: A dockerfile build leaves the tagged image and no containers.
#[tokio::test]
async fn dockerfile_build_produces_image() {
    let (runtime, orchestrator, workspace) = orchestrator(FakeFetcher::dockerfile());
    let request = BuildRequest {
        id: "build-1".to_string(),
        source: SourceLocation::new("https://git.example.com/acme/api.git", "v1.2.0"),
        image: ImageRef::parse("registry.example.com/acme/api:v1.2.0").unwrap(),
        strategy: BuildStrategy::Dockerfile(DockerfileConfig::default()),
        env: HashMap::new(),
    };

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success, "{:?}\n{}", result.error, result.logs);
    assert_eq!(result.image.as_ref(), Some(&request.image));
    assert!(result.image_digest.is_some());
    assert_eq!(
        result.commit.as_ref().and_then(|c| c.branch.as_deref()),
        Some("v1.2.0")
    );
    assert!(runtime.has_image("registry.example.com/acme/api:v1.2.0"));
    assert!(runtime.has_image("docker:27-cli"), "builder image is pulled");
    assert!(runtime.containers().is_empty());
    assert!(
        std::fs::read_dir(workspace.path()).unwrap().next().is_none(),
        "workspace should be cleaned up"
    );
}

/// Test: A static site is compiled, then packaged behind the static server.
#[tokio::test]
async fn static_site_runs_both_steps() {
    let fetcher = FakeFetcher::default()
        .with_file("package.json", "{}")
        .with_file("dist/index.html", "<h1>hi</h1>");
    let (runtime, orchestrator, _workspace) = orchestrator(fetcher);
    let request = request(
        r#"
id: site-7
source:
  url: https://git.example.com/acme/site.git
  branch: main
image: acme/site:7
strategy: static
static_site:
  build_command: npm ci && npm run build
  output_dir: dist/
"#,
    );
    runtime.script("npm run build", ScriptedRun::success("built 3 pages\n"));

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success, "{:?}\n{}", result.error, result.logs);
    assert!(result.logs.contains("Step 1/2: static-build"));
    assert!(result.logs.contains("built 3 pages"));
    assert!(result.logs.contains("Step 2/2: static-package"));
    assert!(runtime.has_image("acme/site:7"));
    assert!(runtime.has_image("node:20-alpine"));
}

/// Test: Compose builds are retagged to the requested image.
#[tokio::test]
async fn compose_build_is_retagged() {
    let fetcher = FakeFetcher::default().with_file("docker-compose.yml", "services: {}\n");
    let (runtime, orchestrator, _workspace) = orchestrator(fetcher);
    let request = request(
        r#"
id: Stack 9
source:
  url: https://git.example.com/acme/stack.git
image: acme/stack:9
strategy: docker-compose
compose:
  service: web
"#,
    );

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success, "{:?}\n{}", result.error, result.logs);
    assert!(result.logs.contains("Tagged mikrocloud-stack-9-web as acme/stack:9"), "{}", result.logs);
    assert!(runtime.has_image("acme/stack:9"));
}

/// Test: A missing compose file fails the build without starting a builder.
#[tokio::test]
async fn missing_compose_file_fails() {
    let (runtime, orchestrator, _workspace) = orchestrator(FakeFetcher::default());
    let request = request(
        r#"
id: stack-10
source:
  url: https://git.example.com/acme/stack.git
image: acme/stack:10
strategy: compose
compose:
  compose_file: deploy/compose.yml
  service: api
"#,
    );

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("deploy/compose.yml not found in build context")
    );
    assert!(result.image.is_none());
    assert!(!runtime.has_image("docker:27-cli"));
}

/// Test: A nonzero builder exit quotes the tail of its output.
#[tokio::test]
async fn nonzero_exit_quotes_output_tail() {
    let (runtime, orchestrator, _workspace) = orchestrator(FakeFetcher::default());
    let request = request(
        r#"
id: bp-1
source:
  url: https://git.example.com/acme/bp.git
image: acme/bp:1
strategy: nixpacks
buildpack:
  start_command: ./run
"#,
    );
    runtime.script(
        "nixpacks build",
        ScriptedRun::failure(2, "detecting provider\nerror: no provider matched\n"),
    );

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("step buildpack exited with code 2: detecting provider\nerror: no provider matched")
    );
    assert!(result.logs.contains("Build failed: step buildpack exited with code 2"));
    assert!(runtime.containers().is_empty());
}

/// Test: Builder image pull failures fail the build.
#[tokio::test]
async fn builder_pull_failure_is_reported() {
    let (runtime, orchestrator, _workspace) = orchestrator(FakeFetcher::dockerfile());
    runtime.fail_next(FailOn::Pull, 1);
    let request = request(
        r#"
id: pull-1
source:
  url: https://git.example.com/acme/api.git
image: acme/api:1
strategy: dockerfile
"#,
    );

    let result = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("injected Pull failure")),
        "{:?}",
        result.error
    );
}

/// Test: A cancelled build reports cancellation as its error.
#[tokio::test]
async fn cancelled_build_reports_cancellation() {
    let (runtime, orchestrator, _workspace) = orchestrator(FakeFetcher::dockerfile());
    let request = request(
        r#"
id: cancel-1
source:
  url: https://git.example.com/acme/api.git
image: acme/api:1
strategy: dockerfile
"#,
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator.build(&request, &cancel).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("build cancelled"));
    assert!(runtime.containers().is_empty());
}

/// Test: Malformed requests are rejected before any container work.
#[tokio::test]
async fn malformed_request_is_an_error() {
    let (runtime, orchestrator, _workspace) = orchestrator(FakeFetcher::dockerfile());
    let request = BuildRequest {
        id: "  ".to_string(),
        source: SourceLocation::new("https://git.example.com/acme/api.git", "main"),
        image: ImageRef::parse("acme/api:1").unwrap(),
        strategy: BuildStrategy::Dockerfile(DockerfileConfig::default()),
        env: HashMap::new(),
    };

    let err = orchestrator
        .build(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::MissingId));
    assert!(!runtime.has_image("docker:27-cli"));
}

/// Test: Requests with a strategy block of another kind do not parse.
#[test]
fn mismatched_strategy_block_does_not_parse() {
    let parsed = serde_yaml::from_str::<BuildRequest>(
        r#"
id: x
source:
  url: https://git.example.com/acme/api.git
image: acme/api:1
strategy: dockerfile
compose:
  service: web
"#,
    );
    let err = parsed.unwrap_err().to_string();
    assert!(err.contains("dockerfile strategy cannot carry a compose configuration block"), "{err}");
}
