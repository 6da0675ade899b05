// ABOUTME: Configuration types and parsing for mikrocloud.yml.
// ABOUTME: Every section is optional; missing fields fall back to defaults.

mod restart_policy;

pub use restart_policy::RestartPolicy;

use crate::build::BuildConfig;
use crate::error::{Error, Result};
use crate::runtime::{RestartPolicyConfig, RuntimeConfig};
use crate::types::ResourceName;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "mikrocloud.yml";
pub const CONFIG_FILENAME_ALT: &str = "mikrocloud.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".mikrocloud/config.yml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine override; detection is used when absent.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub containers: ContainerDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval", with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: default_reconcile_interval(),
        }
    }
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

/// Settings shared by every container the engine manages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerDefaults {
    /// Prefix of deterministic container names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    #[serde(default)]
    pub restart: RestartPolicy,
}

impl Default for ContainerDefaults {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            stop_timeout: default_stop_timeout(),
            restart: RestartPolicy::default(),
        }
    }
}

impl ContainerDefaults {
    pub fn restart_policy(&self) -> RestartPolicyConfig {
        RestartPolicyConfig::from(&self.restart)
    }
}

fn default_name_prefix() -> String {
    "mikrocloud".to_string()
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty file is a valid, all-defaults configuration.
        let mut config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        config.build.name_prefix = config.containers.name_prefix.clone();
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Path of the first configuration file present in `dir`.
    pub fn locate(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        match Self::locate(dir) {
            Some(path) => Self::load(&path),
            None => Err(Error::ConfigNotFound(dir.to_path_buf())),
        }
    }

    /// Like [`Config::discover`], but a missing file yields the defaults.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Err(Error::ConfigNotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    fn validate(&self) -> Result<()> {
        ResourceName::new(&self.containers.name_prefix).map_err(|e| {
            Error::InvalidConfig(format!(
                "containers.name_prefix '{}': {}",
                self.containers.name_prefix, e
            ))
        })?;
        if self.reconcile.interval.is_zero() {
            return Err(Error::InvalidConfig(
                "reconcile.interval must be greater than zero".to_string(),
            ));
        }
        if self.build.engine_socket.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "build.engine_socket must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Write a commented template to `dir`, refusing to overwrite unless `force`.
pub fn init_config(dir: &Path, force: bool) -> Result<PathBuf> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    std::fs::write(&config_path, TEMPLATE)?;
    Ok(config_path)
}

const TEMPLATE: &str = r#"# mikrocloud engine configuration

# Container engine. Detected automatically when omitted
# (rootless Podman, then rootful Podman, then Docker).
# runtime:
#   type: podman
#   socket: /run/user/1000/podman/podman.sock

reconcile:
  interval: 30s

build:
  # Must be reachable by the engine at the same path.
  # workspace_root: /var/lib/mikrocloud/builds
  engine_socket: /var/run/docker.sock
  log_tail: 20
  # images:
  #   buildpack: ghcr.io/railwayapp/nixpacks:latest
  #   node: node:20-alpine
  #   docker: docker:27-cli
  #   static_server: nginx:alpine

containers:
  name_prefix: mikrocloud
  stop_timeout: 10s
  restart: unless-stopped
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.reconcile.interval, Duration::from_secs(30));
        assert_eq!(config.containers.name_prefix, "mikrocloud");
        assert_eq!(config.containers.restart, RestartPolicy::UnlessStopped);
        assert!(config.runtime.runtime.is_none());
    }

    #[test]
    fn template_parses() {
        let config = Config::from_yaml(TEMPLATE).unwrap();
        assert_eq!(config.build.log_tail, 20);
        assert_eq!(config.containers.stop_timeout, Duration::from_secs(10));
    }

    #[test]
    fn prefix_flows_into_build_settings() {
        let config = Config::from_yaml("containers:\n  name_prefix: edge\n").unwrap();
        assert_eq!(config.build.name_prefix, "edge");
    }

    #[test]
    fn rejects_bad_prefix_and_zero_interval() {
        assert!(matches!(
            Config::from_yaml("containers:\n  name_prefix: Not_Valid\n"),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_yaml("reconcile:\n  interval: 0s\n"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn discovers_alternate_locations() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));
        assert!(Config::discover_or_default(dir.path()).is_ok());

        std::fs::create_dir(dir.path().join(".mikrocloud")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME_DIR),
            "reconcile:\n  interval: 5s\n",
        )
        .unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.reconcile.interval, Duration::from_secs(5));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_config(dir.path(), false).unwrap();
        assert!(path.exists());
        assert!(matches!(
            init_config(dir.path(), false),
            Err(Error::AlreadyExists(_))
        ));
        init_config(dir.path(), true).unwrap();
    }
}
