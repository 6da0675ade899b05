// ABOUTME: Local engine discovery for Docker and Podman sockets.
// ABOUTME: Checks Podman sockets first, then Docker, unless configuration pins one.

use super::types::{RuntimeConfig, RuntimeEndpoint, RuntimeType};
use std::path::Path;

const ROOTFUL_PODMAN: &str = "/run/podman/podman.sock";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Error during runtime detection.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("no container runtime found (checked Podman and Docker sockets)")]
    NoRuntimeFound,

    #[error("configured socket does not exist: {0}")]
    SocketMissing(String),
}

/// Resolve the engine endpoint for this host.
///
/// An explicit `config.runtime` wins. Otherwise the first existing socket
/// in this order is used:
/// 1. Rootless Podman (`/run/user/$UID/podman/podman.sock`)
/// 2. Rootful Podman (`/run/podman/podman.sock`)
/// 3. Docker (`/var/run/docker.sock`)
pub fn detect_local(config: Option<&RuntimeConfig>) -> Result<RuntimeEndpoint, DetectionError> {
    if let Some(cfg) = config {
        match (cfg.runtime, &cfg.socket) {
            (Some(runtime_type), socket) => {
                let socket_path = socket
                    .clone()
                    .unwrap_or_else(|| default_socket_path(runtime_type));
                return Ok(RuntimeEndpoint {
                    runtime_type,
                    socket_path,
                });
            }
            (None, Some(socket)) => {
                if !Path::new(socket).exists() {
                    return Err(DetectionError::SocketMissing(socket.clone()));
                }
                return Ok(RuntimeEndpoint {
                    runtime_type: guess_type(socket),
                    socket_path: socket.clone(),
                });
            }
            (None, None) => {}
        }
    }

    candidate_sockets()
        .into_iter()
        .find(|endpoint| Path::new(&endpoint.socket_path).exists())
        .ok_or(DetectionError::NoRuntimeFound)
}

fn candidate_sockets() -> Vec<RuntimeEndpoint> {
    let mut candidates = Vec::with_capacity(3);
    if let Some(uid) = current_uid() {
        candidates.push(RuntimeEndpoint {
            runtime_type: RuntimeType::Podman,
            socket_path: format!("/run/user/{uid}/podman/podman.sock"),
        });
    }
    candidates.push(RuntimeEndpoint {
        runtime_type: RuntimeType::Podman,
        socket_path: ROOTFUL_PODMAN.to_string(),
    });
    candidates.push(RuntimeEndpoint {
        runtime_type: RuntimeType::Docker,
        socket_path: DOCKER_SOCKET.to_string(),
    });
    candidates
}

fn current_uid() -> Option<String> {
    std::env::var("UID").ok().or_else(|| {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| {
                status
                    .lines()
                    .find(|l| l.starts_with("Uid:"))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(str::to_string)
            })
    })
}

fn guess_type(socket: &str) -> RuntimeType {
    if socket.contains("podman") {
        RuntimeType::Podman
    } else {
        RuntimeType::Docker
    }
}

fn default_socket_path(runtime: RuntimeType) -> String {
    match runtime {
        RuntimeType::Docker => DOCKER_SOCKET.to_string(),
        RuntimeType::Podman => ROOTFUL_PODMAN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_runtime_uses_its_default_socket() {
        let cfg = RuntimeConfig {
            runtime: Some(RuntimeType::Docker),
            socket: None,
        };
        let endpoint = detect_local(Some(&cfg)).unwrap();
        assert_eq!(endpoint.socket_path, DOCKER_SOCKET);
    }

    #[test]
    fn explicit_socket_must_exist() {
        let cfg = RuntimeConfig {
            runtime: None,
            socket: Some("/nonexistent/podman.sock".to_string()),
        };
        assert!(matches!(
            detect_local(Some(&cfg)),
            Err(DetectionError::SocketMissing(_))
        ));
    }

    #[test]
    fn podman_candidates_come_before_docker() {
        let candidates = candidate_sockets();
        assert_eq!(
            candidates.last().map(|c| c.runtime_type),
            Some(RuntimeType::Docker)
        );
        assert!(
            candidates[..candidates.len() - 1]
                .iter()
                .all(|c| c.runtime_type == RuntimeType::Podman)
        );
    }
}
