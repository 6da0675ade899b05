// ABOUTME: Build requests and the tagged union of build strategies.
// ABOUTME: Raw stored settings are converted once, rejecting mismatched strategy blocks.

use crate::build::error::BuildError;
use crate::types::ImageRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

/// Where the source lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub url: String,
    #[serde(default = "default_reference", alias = "branch")]
    pub reference: String,
    /// Sub-path inside the checkout used as the build context.
    #[serde(default)]
    pub context_root: Option<String>,
}

fn default_reference() -> String {
    "main".to_string()
}

impl SourceLocation {
    pub fn new(url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            context_root: None,
        }
    }

    /// Context root as a relative path, rejecting anything that leaves the checkout.
    pub fn context_path(&self) -> Result<&Path, BuildError> {
        let Some(root) = self.context_root.as_deref().filter(|r| !r.is_empty()) else {
            return Ok(Path::new(""));
        };
        relative_inside(root).ok_or_else(|| BuildError::InvalidContextRoot(root.to_string()))
    }
}

/// Check that `path` is relative and never climbs above its base.
pub(crate) fn relative_inside(path: &str) -> Option<&Path> {
    let p = Path::new(path);
    let mut depth: i32 = 0;
    for component in p.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(p)
}

/// Strategy tag as stored by the outer layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[serde(alias = "nixpacks")]
    Buildpack,
    #[serde(alias = "static")]
    StaticSite,
    Dockerfile,
    #[serde(alias = "docker-compose")]
    Compose,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Buildpack => "buildpack",
            StrategyKind::StaticSite => "static-site",
            StrategyKind::Dockerfile => "dockerfile",
            StrategyKind::Compose => "compose",
        })
    }
}

impl FromStr for StrategyKind {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buildpack" | "nixpacks" => Ok(StrategyKind::Buildpack),
            "static-site" | "static" => Ok(StrategyKind::StaticSite),
            "dockerfile" => Ok(StrategyKind::Dockerfile),
            "compose" | "docker-compose" => Ok(StrategyKind::Compose),
            other => Err(BuildError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildpackConfig {
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    /// Extra variables passed to the buildpack as `--env`.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticSiteConfig {
    pub build_command: String,
    pub output_dir: String,
    /// Replaces the default nginx server block.
    #[serde(default)]
    pub nginx_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DockerfileConfig {
    #[serde(default = "default_dockerfile")]
    pub dockerfile_path: String,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl Default for DockerfileConfig {
    fn default() -> Self {
        Self {
            dockerfile_path: default_dockerfile(),
            build_args: HashMap::new(),
            target: None,
        }
    }
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComposeConfig {
    #[serde(default = "default_compose_file")]
    pub compose_file: String,
    pub service: String,
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

/// A build strategy with exactly the configuration it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStrategy {
    Buildpack(BuildpackConfig),
    StaticSite(StaticSiteConfig),
    Dockerfile(DockerfileConfig),
    Compose(ComposeConfig),
}

impl BuildStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            BuildStrategy::Buildpack(_) => StrategyKind::Buildpack,
            BuildStrategy::StaticSite(_) => StrategyKind::StaticSite,
            BuildStrategy::Dockerfile(_) => StrategyKind::Dockerfile,
            BuildStrategy::Compose(_) => StrategyKind::Compose,
        }
    }

    fn validate(&self) -> Result<(), BuildError> {
        let invalid = |msg: &str| {
            Err(BuildError::InvalidConfig {
                strategy: self.kind(),
                reason: msg.to_string(),
            })
        };
        match self {
            BuildStrategy::Buildpack(_) => Ok(()),
            BuildStrategy::StaticSite(cfg) => {
                if cfg.build_command.trim().is_empty() {
                    return invalid("build command is empty");
                }
                if cfg.output_dir.trim().is_empty() || relative_inside(&cfg.output_dir).is_none() {
                    return invalid("output directory must be a relative path inside the source");
                }
                Ok(())
            }
            BuildStrategy::Dockerfile(cfg) => {
                if cfg.dockerfile_path.trim().is_empty()
                    || relative_inside(&cfg.dockerfile_path).is_none()
                {
                    return invalid("dockerfile path must be a relative path inside the source");
                }
                Ok(())
            }
            BuildStrategy::Compose(cfg) => {
                if cfg.service.trim().is_empty() {
                    return invalid("compose service is empty");
                }
                if relative_inside(&cfg.compose_file).is_none() {
                    return invalid("compose file must be a relative path inside the source");
                }
                Ok(())
            }
        }
    }
}

/// Build settings as the outer layer stores them: a tag plus optional blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    pub strategy: StrategyKind,
    #[serde(default, alias = "nixpacks")]
    pub buildpack: Option<BuildpackConfig>,
    #[serde(default, alias = "static")]
    pub static_site: Option<StaticSiteConfig>,
    #[serde(default)]
    pub dockerfile: Option<DockerfileConfig>,
    #[serde(default)]
    pub compose: Option<ComposeConfig>,
}

impl BuildSettings {
    /// Settings for a strategy whose block may be omitted.
    pub fn bare(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            buildpack: None,
            static_site: None,
            dockerfile: None,
            compose: None,
        }
    }

    fn populated(&self) -> Vec<StrategyKind> {
        let mut kinds = Vec::new();
        if self.buildpack.is_some() {
            kinds.push(StrategyKind::Buildpack);
        }
        if self.static_site.is_some() {
            kinds.push(StrategyKind::StaticSite);
        }
        if self.dockerfile.is_some() {
            kinds.push(StrategyKind::Dockerfile);
        }
        if self.compose.is_some() {
            kinds.push(StrategyKind::Compose);
        }
        kinds
    }
}

impl From<BuildStrategy> for BuildSettings {
    fn from(strategy: BuildStrategy) -> Self {
        let mut settings = BuildSettings::bare(strategy.kind());
        match strategy {
            BuildStrategy::Buildpack(cfg) => settings.buildpack = Some(cfg),
            BuildStrategy::StaticSite(cfg) => settings.static_site = Some(cfg),
            BuildStrategy::Dockerfile(cfg) => settings.dockerfile = Some(cfg),
            BuildStrategy::Compose(cfg) => settings.compose = Some(cfg),
        }
        settings
    }
}

impl TryFrom<BuildSettings> for BuildStrategy {
    type Error = BuildError;

    fn try_from(settings: BuildSettings) -> Result<Self, Self::Error> {
        if let Some(other) = settings
            .populated()
            .into_iter()
            .find(|k| *k != settings.strategy)
        {
            return Err(BuildError::MismatchedConfig {
                strategy: settings.strategy,
                found: other,
            });
        }

        let missing = BuildError::MissingConfig(settings.strategy);
        let strategy = match settings.strategy {
            StrategyKind::Buildpack => {
                BuildStrategy::Buildpack(settings.buildpack.unwrap_or_default())
            }
            StrategyKind::Dockerfile => {
                BuildStrategy::Dockerfile(settings.dockerfile.unwrap_or_default())
            }
            StrategyKind::StaticSite => {
                BuildStrategy::StaticSite(settings.static_site.ok_or(missing)?)
            }
            StrategyKind::Compose => BuildStrategy::Compose(settings.compose.ok_or(missing)?),
        };
        strategy.validate()?;
        Ok(strategy)
    }
}

/// Everything needed to turn a source checkout into a tagged image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBuildRequest", into = "RawBuildRequest")]
pub struct BuildRequest {
    pub id: String,
    pub source: SourceLocation,
    pub image: ImageRef,
    pub strategy: BuildStrategy,
    pub env: HashMap<String, String>,
}

impl BuildRequest {
    /// Check everything that can be checked without touching the engine.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.id.trim().is_empty() {
            return Err(BuildError::MissingId);
        }
        if self.source.url.trim().is_empty() {
            return Err(BuildError::EmptySourceUrl);
        }
        if self.source.reference.trim().is_empty() {
            return Err(BuildError::EmptyReference);
        }
        self.source.context_path()?;
        if self.image.tag().is_none() {
            return Err(BuildError::UntaggedImage(self.image.to_string()));
        }
        self.strategy.validate()
    }
}

#[derive(Serialize, Deserialize)]
struct RawBuildRequest {
    id: String,
    source: SourceLocation,
    image: ImageRef,
    #[serde(flatten)]
    build: BuildSettings,
    #[serde(default)]
    env: HashMap<String, String>,
}

impl TryFrom<RawBuildRequest> for BuildRequest {
    type Error = BuildError;

    fn try_from(raw: RawBuildRequest) -> Result<Self, Self::Error> {
        let request = BuildRequest {
            id: raw.id,
            source: raw.source,
            image: raw.image,
            strategy: BuildStrategy::try_from(raw.build)?,
            env: raw.env,
        };
        request.validate()?;
        Ok(request)
    }
}

impl From<BuildRequest> for RawBuildRequest {
    fn from(request: BuildRequest) -> Self {
        RawBuildRequest {
            id: request.id,
            source: request.source,
            image: request.image,
            build: request.strategy.into(),
            env: request.env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_block_is_rejected() {
        let mut settings = BuildSettings::bare(StrategyKind::Dockerfile);
        settings.compose = Some(ComposeConfig {
            compose_file: "compose.yml".to_string(),
            service: "web".to_string(),
        });
        assert!(matches!(
            BuildStrategy::try_from(settings),
            Err(BuildError::MismatchedConfig {
                strategy: StrategyKind::Dockerfile,
                found: StrategyKind::Compose
            })
        ));
    }

    #[test]
    fn static_site_requires_its_block() {
        let settings = BuildSettings::bare(StrategyKind::StaticSite);
        assert!(matches!(
            BuildStrategy::try_from(settings),
            Err(BuildError::MissingConfig(StrategyKind::StaticSite))
        ));
    }

    #[test]
    fn dockerfile_block_defaults() {
        let strategy = BuildStrategy::try_from(BuildSettings::bare(StrategyKind::Dockerfile)).unwrap();
        assert_eq!(strategy, BuildStrategy::Dockerfile(DockerfileConfig::default()));
    }

    #[test]
    fn context_root_cannot_escape() {
        let mut source = SourceLocation::new("https://example.com/repo.git", "main");
        source.context_root = Some("apps/../../etc".to_string());
        assert!(matches!(
            source.context_path(),
            Err(BuildError::InvalidContextRoot(_))
        ));
        source.context_root = Some("apps/web".to_string());
        assert_eq!(source.context_path().unwrap(), Path::new("apps/web"));
    }

    #[test]
    fn unknown_strategy_name() {
        assert!(matches!(
            "heroku".parse::<StrategyKind>(),
            Err(BuildError::UnknownStrategy(_))
        ));
        assert_eq!("nixpacks".parse::<StrategyKind>().unwrap(), StrategyKind::Buildpack);
    }

    #[test]
    fn request_parses_from_yaml() {
        let yaml = r#"
id: build-1
source:
  url: https://example.com/site.git
  branch: release
image: mikrocloud/site:1
strategy: static-site
static_site:
  build_command: npm run build
  output_dir: dist
"#;
        let request: BuildRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.source.reference, "release");
        assert_eq!(request.strategy.kind(), StrategyKind::StaticSite);
    }

    #[test]
    fn request_yaml_with_foreign_block_fails() {
        let yaml = r#"
id: build-1
source: { url: "https://example.com/site.git" }
image: mikrocloud/site:1
strategy: buildpack
dockerfile: { dockerfile_path: Dockerfile }
"#;
        assert!(serde_yaml::from_str::<BuildRequest>(yaml).is_err());
    }
}
