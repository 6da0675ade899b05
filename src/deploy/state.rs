// ABOUTME: Deployment status values and the transition table between them.
// ABOUTME: Every status change goes through DeploymentStatus::next.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a deployment is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Created,
    Building,
    Deploying,
    Running,
    Failed,
    Cancelled,
    Stopped,
}

/// Something that happened to a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentEvent {
    StartBuild,
    BuildSucceeded,
    BuildFailed,
    DeploySucceeded,
    DeployFailed,
    Stop,
    Cancel,
}

impl DeploymentStatus {
    pub const ALL: [DeploymentStatus; 7] = [
        Self::Created,
        Self::Building,
        Self::Deploying,
        Self::Running,
        Self::Failed,
        Self::Cancelled,
        Self::Stopped,
    ];

    /// The status after `event`, or `None` if the edge does not exist.
    pub fn next(self, event: DeploymentEvent) -> Option<DeploymentStatus> {
        use DeploymentEvent as E;
        use DeploymentStatus as S;

        match (self, event) {
            (S::Created, E::StartBuild) => Some(S::Building),
            (S::Building, E::BuildSucceeded) => Some(S::Deploying),
            (S::Building, E::BuildFailed) => Some(S::Failed),
            (S::Deploying, E::DeploySucceeded) => Some(S::Running),
            (S::Deploying, E::DeployFailed) => Some(S::Failed),
            (S::Running, E::Stop) => Some(S::Stopped),
            (S::Created | S::Building | S::Deploying, E::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }

    /// Failed, Cancelled, and Stopped never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Stopped)
    }

    /// A worker is still driving the deployment.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Building | Self::Deploying)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeploymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartBuild => "start build",
            Self::BuildSucceeded => "build succeeded",
            Self::BuildFailed => "build failed",
            Self::DeploySucceeded => "deploy succeeded",
            Self::DeployFailed => "deploy failed",
            Self::Stop => "stop",
            Self::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        let events = [
            DeploymentEvent::StartBuild,
            DeploymentEvent::BuildSucceeded,
            DeploymentEvent::BuildFailed,
            DeploymentEvent::DeploySucceeded,
            DeploymentEvent::DeployFailed,
            DeploymentEvent::Stop,
            DeploymentEvent::Cancel,
        ];
        for status in DeploymentStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for event in events {
                assert_eq!(status.next(event), None, "{status} --{event}-->");
            }
        }
    }

    #[test]
    fn running_cannot_be_cancelled() {
        assert_eq!(DeploymentStatus::Running.next(DeploymentEvent::Cancel), None);
        assert_eq!(
            DeploymentStatus::Running.next(DeploymentEvent::Stop),
            Some(DeploymentStatus::Stopped)
        );
    }
}
