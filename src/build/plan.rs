// ABOUTME: Turns a build request into an ordered list of builder-container steps.
// ABOUTME: Pure planning: no I/O, so every strategy's commands can be checked directly.

use crate::build::error::BuildError;
use crate::build::request::{
    BuildRequest, BuildStrategy, BuildpackConfig, ComposeConfig, DockerfileConfig,
    StaticSiteConfig,
};
use crate::types::{ImageRef, slugify};
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Where the workspace is mounted inside builder containers.
pub const WORKSPACE_MOUNT: &str = "/workspace";

/// Generated Dockerfile for static sites, written next to the build output.
pub const STATIC_DOCKERFILE: &str = "Dockerfile.mikrocloud";
const STATIC_NGINX_CONF: &str = "mikrocloud.nginx.conf";

/// Images the builder containers run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderImages {
    #[serde(default = "default_buildpack_image")]
    pub buildpack: ImageRef,
    #[serde(default = "default_node_image")]
    pub node: ImageRef,
    /// Image with the docker CLI and compose plugin.
    #[serde(default = "default_docker_image")]
    pub docker: ImageRef,
    /// Base image for packaged static sites.
    #[serde(default = "default_static_server")]
    pub static_server: ImageRef,
}

fn image(reference: &str) -> ImageRef {
    ImageRef::parse(reference).expect("built-in builder image reference is valid")
}

fn default_buildpack_image() -> ImageRef {
    image("ghcr.io/railwayapp/nixpacks:latest")
}

fn default_node_image() -> ImageRef {
    image("node:20-alpine")
}

fn default_docker_image() -> ImageRef {
    image("docker:27-cli")
}

fn default_static_server() -> ImageRef {
    image("nginx:alpine")
}

impl Default for BuilderImages {
    fn default() -> Self {
        Self {
            buildpack: default_buildpack_image(),
            node: default_node_image(),
            docker: default_docker_image(),
            static_server: default_static_server(),
        }
    }
}

/// A file written into the build context before a step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the build context.
    pub path: PathBuf,
    pub contents: String,
}

/// One builder-container invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub name: &'static str,
    pub image: ImageRef,
    /// Shell script run with `sh -c` in the build context.
    pub script: String,
    pub env: HashMap<String, String>,
    /// Paths (relative to the context) that must exist before the step runs.
    pub requires: Vec<PathBuf>,
    pub files: Vec<GeneratedFile>,
    /// Image the step leaves behind in the engine, if any.
    pub produces: Option<ImageRef>,
}

impl BuildStep {
    pub fn command(&self) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.script.clone()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// Build context relative to the checkout.
    pub context: PathBuf,
    pub steps: NonEmpty<BuildStep>,
    /// Image to tag with the requested name once all steps succeed.
    pub retag_from: Option<String>,
}

impl BuildPlan {
    /// Working directory of the steps inside the builder container.
    pub fn container_workdir(&self) -> String {
        let context = self.context.to_string_lossy();
        if context.is_empty() {
            WORKSPACE_MOUNT.to_string()
        } else {
            format!("{}/{}", WORKSPACE_MOUNT, context.trim_end_matches('/'))
        }
    }
}

/// Plan the builder steps for `request`.
pub fn plan_build(request: &BuildRequest, images: &BuilderImages) -> Result<BuildPlan, BuildError> {
    request.validate()?;
    let context = request.source.context_path()?.to_path_buf();

    let (steps, retag_from) = match &request.strategy {
        BuildStrategy::Buildpack(cfg) => (buildpack_steps(request, cfg, images), None),
        BuildStrategy::StaticSite(cfg) => (static_site_steps(request, cfg, images), None),
        BuildStrategy::Dockerfile(cfg) => (dockerfile_steps(request, cfg, images), None),
        BuildStrategy::Compose(cfg) => {
            let (steps, built) = compose_steps(request, cfg, images);
            (steps, Some(built))
        }
    };

    Ok(BuildPlan {
        context,
        steps,
        retag_from,
    })
}

fn buildpack_steps(
    request: &BuildRequest,
    cfg: &BuildpackConfig,
    images: &BuilderImages,
) -> NonEmpty<BuildStep> {
    let mut script = format!("nixpacks build . --name {}", shell_quote(&request.image.to_string()));
    if let Some(start) = &cfg.start_command {
        script.push_str(&format!(" --start-cmd {}", shell_quote(start)));
    }
    if let Some(build) = &cfg.build_command {
        script.push_str(&format!(" --build-cmd {}", shell_quote(build)));
    }

    // Buildpack variables override request env on conflict.
    let mut variables: BTreeMap<&str, &str> = request
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    variables.extend(cfg.variables.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    for (key, value) in variables {
        script.push_str(&format!(" --env {}", shell_quote(&format!("{key}={value}"))));
    }

    NonEmpty::new(BuildStep {
        name: "buildpack",
        image: images.buildpack.clone(),
        script,
        env: HashMap::new(),
        requires: Vec::new(),
        files: Vec::new(),
        produces: Some(request.image.clone()),
    })
}

fn static_site_steps(
    request: &BuildRequest,
    cfg: &StaticSiteConfig,
    images: &BuilderImages,
) -> NonEmpty<BuildStep> {
    let output_dir = cfg.output_dir.trim_end_matches('/');

    let mut dockerfile = format!(
        "FROM {}\nCOPY {}/ /usr/share/nginx/html/\n",
        images.static_server, output_dir
    );
    let mut files = Vec::with_capacity(2);
    if let Some(nginx) = &cfg.nginx_config {
        dockerfile.push_str(&format!(
            "COPY {} /etc/nginx/conf.d/default.conf\n",
            STATIC_NGINX_CONF
        ));
        files.push(GeneratedFile {
            path: PathBuf::from(STATIC_NGINX_CONF),
            contents: nginx.clone(),
        });
    }
    dockerfile.push_str("EXPOSE 80\n");
    files.push(GeneratedFile {
        path: PathBuf::from(STATIC_DOCKERFILE),
        contents: dockerfile,
    });

    let compile = BuildStep {
        name: "static-build",
        image: images.node.clone(),
        script: cfg.build_command.clone(),
        env: request.env.clone(),
        requires: Vec::new(),
        files: Vec::new(),
        produces: None,
    };
    let package = BuildStep {
        name: "static-package",
        image: images.docker.clone(),
        script: format!(
            "docker build -f {} -t {} .",
            STATIC_DOCKERFILE,
            shell_quote(&request.image.to_string())
        ),
        env: HashMap::new(),
        requires: vec![PathBuf::from(output_dir)],
        files,
        produces: Some(request.image.clone()),
    };

    NonEmpty {
        head: compile,
        tail: vec![package],
    }
}

fn dockerfile_steps(
    request: &BuildRequest,
    cfg: &DockerfileConfig,
    images: &BuilderImages,
) -> NonEmpty<BuildStep> {
    let mut script = format!("docker build -f {}", shell_quote(&cfg.dockerfile_path));
    let args: BTreeMap<&String, &String> = cfg.build_args.iter().collect();
    for (key, value) in args {
        script.push_str(&format!(" --build-arg {}", shell_quote(&format!("{key}={value}"))));
    }
    if let Some(target) = &cfg.target {
        script.push_str(&format!(" --target {}", shell_quote(target)));
    }
    script.push_str(&format!(" -t {} .", shell_quote(&request.image.to_string())));

    NonEmpty::new(BuildStep {
        name: "dockerfile",
        image: images.docker.clone(),
        script,
        env: HashMap::new(),
        requires: vec![PathBuf::from(&cfg.dockerfile_path)],
        files: Vec::new(),
        produces: Some(request.image.clone()),
    })
}

/// Compose project name for a build, also the prefix of the images compose produces.
pub fn compose_project(request_id: &str) -> String {
    format!("mikrocloud-{}", slugify(request_id))
}

fn compose_steps(
    request: &BuildRequest,
    cfg: &ComposeConfig,
    images: &BuilderImages,
) -> (NonEmpty<BuildStep>, String) {
    let project = compose_project(&request.id);
    let built = format!("{}-{}", project, cfg.service);
    let script = format!(
        "docker compose -p {} -f {} build {}",
        shell_quote(&project),
        shell_quote(&cfg.compose_file),
        shell_quote(&cfg.service)
    );

    let step = BuildStep {
        name: "compose",
        image: images.docker.clone(),
        script,
        env: request.env.clone(),
        requires: vec![PathBuf::from(&cfg.compose_file)],
        files: Vec::new(),
        produces: ImageRef::parse(&built).ok(),
    };
    (NonEmpty::new(step), built)
}

/// Quote `value` for a POSIX shell unless it is made only of safe characters.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '@' | ',')
        });
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

/// Resolve a plan-relative path against the checkout root on the host.
pub fn host_path(checkout: &Path, plan: &BuildPlan, relative: &Path) -> PathBuf {
    checkout.join(&plan.context).join(relative)
}
