// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML sections, duration parsing, restart policies, and engine overrides.

use mikrocloud::config::*;
use mikrocloud::error::Error;
use mikrocloud::runtime::{RestartPolicyConfig, RuntimeType};
use std::path::PathBuf;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn parse_full_config() {
        let yaml = r#"
runtime:
  type: podman
  socket: /run/user/1000/podman/podman.sock

reconcile:
  interval: 1m 30s

build:
  workspace_root: /srv/mikrocloud/builds
  engine_socket: /run/podman/podman.sock
  log_tail: 50
  images:
    node: node:22-alpine

containers:
  name_prefix: edge
  stop_timeout: 45s
  restart: on-failure:5
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.runtime.runtime, Some(RuntimeType::Podman));
        assert_eq!(
            config.runtime.socket.as_deref(),
            Some("/run/user/1000/podman/podman.sock")
        );
        assert_eq!(config.reconcile.interval, Duration::from_secs(90));
        assert_eq!(
            config.build.workspace_root,
            PathBuf::from("/srv/mikrocloud/builds")
        );
        assert_eq!(config.build.engine_socket, "/run/podman/podman.sock");
        assert_eq!(config.build.log_tail, 50);
        assert_eq!(config.build.images.node.to_string(), "node:22-alpine");
        assert_eq!(config.build.images.docker.to_string(), "docker:27-cli");
        assert_eq!(config.build.name_prefix, "edge");
        assert_eq!(config.containers.stop_timeout, Duration::from_secs(45));
        assert_eq!(
            config.containers.restart_policy(),
            RestartPolicyConfig::OnFailure {
                max_retries: Some(5)
            }
        );
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = Config::from_yaml("containers:\n  restart: always\n").unwrap();
        assert_eq!(config.containers.restart, RestartPolicy::Always);
        assert_eq!(config.containers.name_prefix, "mikrocloud");
        assert_eq!(config.containers.stop_timeout, Duration::from_secs(10));
        assert_eq!(config.reconcile.interval, Duration::from_secs(30));
    }
}

mod restart_policy {
    use super::*;

    #[test]
    fn parses_every_form() {
        let cases = [
            ("no", RestartPolicy::No),
            ("always", RestartPolicy::Always),
            ("unless-stopped", RestartPolicy::UnlessStopped),
            ("on-failure", RestartPolicy::OnFailure { max_retries: None }),
            (
                "on-failure:3",
                RestartPolicy::OnFailure {
                    max_retries: Some(3),
                },
            ),
        ];
        for (text, expected) in cases {
            let parsed: RestartPolicy = text.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), text);
        }
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = Config::from_yaml("containers:\n  restart: sometimes\n").unwrap_err();
        assert!(matches!(err, Error::Yaml(_)), "got {err:?}");
        assert!(err.to_string().contains("unknown restart policy"));
    }
}

mod validation {
    use super::*;

    #[test]
    fn rejects_bad_durations() {
        assert!(Config::from_yaml("reconcile:\n  interval: soon\n").is_err());
    }

    #[test]
    fn rejects_empty_engine_socket() {
        let err = Config::from_yaml("build:\n  engine_socket: \"  \"\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)), "got {err:?}");
    }

    #[test]
    fn rejects_unknown_runtime_type() {
        assert!(Config::from_yaml("runtime:\n  type: containerd\n").is_err());
    }
}

mod discovery {
    use super::*;

    #[test]
    fn yaml_extension_is_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME_ALT),
            "containers:\n  name_prefix: alt\n",
        )
        .unwrap();

        assert_eq!(
            Config::locate(dir.path()),
            Some(dir.path().join(CONFIG_FILENAME_ALT))
        );
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.containers.name_prefix, "alt");
    }

    #[test]
    fn primary_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "").unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME_ALT), "").unwrap();
        assert_eq!(
            Config::locate(dir.path()),
            Some(dir.path().join(CONFIG_FILENAME))
        );
    }

    #[test]
    fn invalid_file_is_not_replaced_by_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILENAME),
            "reconcile:\n  interval: 0s\n",
        )
        .unwrap();
        assert!(matches!(
            Config::discover_or_default(dir.path()),
            Err(Error::InvalidConfig(_))
        ));
    }
}
