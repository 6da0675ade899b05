// ABOUTME: The persisted deployment record and its guarded mutations.
// ABOUTME: Status changes follow the transition table; logs only ever grow.

use crate::build::CommitInfo;
use crate::deploy::error::DeployError;
use crate::deploy::state::{DeploymentEvent, DeploymentStatus};
use crate::types::{ApplicationId, ContainerId, DeploymentId, ImageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What caused a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Push,
    Promotion,
}

/// Who triggered a deployment and how. The outer layer's context is
/// carried through opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

impl Trigger {
    pub fn manual(by: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            triggered_by: Some(by.into()),
        }
    }

    pub fn push() -> Self {
        Self {
            kind: TriggerKind::Push,
            triggered_by: None,
        }
    }
}

/// Everything a repository needs to create a deployment. The number is
/// assigned by the repository.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub application_id: ApplicationId,
    pub production: bool,
    pub trigger: Trigger,
    pub image: Option<ImageRef>,
    pub image_digest: Option<String>,
    pub commit: Option<CommitInfo>,
    pub promoted_from: Option<DeploymentId>,
}

impl NewDeployment {
    pub fn new(application_id: ApplicationId, trigger: Trigger) -> Self {
        Self {
            application_id,
            production: false,
            trigger,
            image: None,
            image_digest: None,
            commit: None,
            promoted_from: None,
        }
    }

    /// Turn into a `Created` deployment with the given number.
    pub fn into_deployment(self, number: u64) -> Deployment {
        let now = Utc::now();
        Deployment {
            id: DeploymentId::generate(),
            application_id: self.application_id,
            number,
            production: self.production,
            trigger: self.trigger,
            image: self.image,
            image_digest: self.image_digest,
            container_id: None,
            commit: self.commit,
            promoted_from: self.promoted_from,
            status: DeploymentStatus::Created,
            build_log: String::new(),
            deploy_log: String::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    id: DeploymentId,
    application_id: ApplicationId,
    number: u64,
    production: bool,
    trigger: Trigger,
    image: Option<ImageRef>,
    image_digest: Option<String>,
    container_id: Option<ContainerId>,
    commit: Option<CommitInfo>,
    promoted_from: Option<DeploymentId>,
    status: DeploymentStatus,
    build_log: String,
    deploy_log: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Deployment {
    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }

    pub fn image_digest(&self) -> Option<&str> {
        self.image_digest.as_deref()
    }

    pub fn container_id(&self) -> Option<&ContainerId> {
        self.container_id.as_ref()
    }

    pub fn commit(&self) -> Option<&CommitInfo> {
        self.commit.as_ref()
    }

    pub fn promoted_from(&self) -> Option<&DeploymentId> {
        self.promoted_from.as_ref()
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    pub fn deploy_log(&self) -> &str {
        &self.deploy_log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Optimistic-concurrency version; repositories bump it on every update.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// For repository implementations only.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn apply(&mut self, event: DeploymentEvent) -> Result<(), DeployError> {
        let next = self
            .status
            .next(event)
            .ok_or(DeployError::InvalidTransition {
                from: self.status,
                event,
            })?;
        self.status = next;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// `Created → Building`.
    pub fn start_build(&mut self) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::StartBuild)?;
        append_line(
            &mut self.build_log,
            &format!("Deployment #{} started at {}", self.number, self.updated_at.to_rfc3339()),
        );
        Ok(())
    }

    /// `Building → Deploying`, recording the produced image.
    pub fn build_succeeded(
        &mut self,
        image: ImageRef,
        digest: Option<String>,
    ) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::BuildSucceeded)?;
        self.image = Some(image);
        if digest.is_some() {
            self.image_digest = digest;
        }
        Ok(())
    }

    /// `Building → Failed`, appending `error` to the build log.
    pub fn build_failed(&mut self, error: &str) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::BuildFailed)?;
        append_line(&mut self.build_log, &format!("Error: {}", error));
        Ok(())
    }

    /// `Deploying → Running`.
    pub fn deploy_succeeded(&mut self, container: ContainerId) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::DeploySucceeded)?;
        self.container_id = Some(container);
        Ok(())
    }

    /// `Deploying → Failed`, appending `error` to the deploy log.
    pub fn deploy_failed(&mut self, error: &str) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::DeployFailed)?;
        append_line(&mut self.deploy_log, &format!("Error: {}", error));
        Ok(())
    }

    /// `Running → Stopped`, with a note in the deploy log.
    pub fn stop(&mut self, note: &str) -> Result<(), DeployError> {
        self.apply(DeploymentEvent::Stop)?;
        append_line(&mut self.deploy_log, note);
        Ok(())
    }

    /// `Created | Building | Deploying → Cancelled`.
    pub fn cancel(&mut self, note: &str) -> Result<(), DeployError> {
        let phase = self.status;
        self.apply(DeploymentEvent::Cancel)?;
        let log = if phase == DeploymentStatus::Deploying {
            &mut self.deploy_log
        } else {
            &mut self.build_log
        };
        append_line(log, note);
        Ok(())
    }

    pub fn append_build_log(&mut self, text: &str) {
        if append_line(&mut self.build_log, text) {
            self.touch();
        }
    }

    pub fn append_deploy_log(&mut self, text: &str) {
        if append_line(&mut self.deploy_log, text) {
            self.touch();
        }
    }

    /// Record the container created for this deployment before it is started,
    /// so cancellation and deletion can find it.
    pub fn attach_container(&mut self, container: ContainerId) {
        self.container_id = Some(container);
        self.touch();
    }

    pub fn set_commit(&mut self, commit: CommitInfo) {
        self.commit = Some(commit);
        self.touch();
    }
}

/// Append `text` as whole lines. Returns whether anything was written.
fn append_line(log: &mut String, text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    log.push_str(text);
    if !text.ends_with('\n') {
        log.push('\n');
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created() -> Deployment {
        NewDeployment::new(ApplicationId::new("app"), Trigger::push()).into_deployment(1)
    }

    #[test]
    fn happy_path_reaches_running() {
        let mut d = created();
        d.start_build().unwrap();
        d.build_succeeded(ImageRef::parse("app:1").unwrap(), Some("sha256:abc".into()))
            .unwrap();
        d.deploy_succeeded(ContainerId::new("c1")).unwrap();

        assert_eq!(d.status(), DeploymentStatus::Running);
        assert_eq!(d.image_digest(), Some("sha256:abc"));
        assert_eq!(d.container_id().map(|c| c.as_str()), Some("c1"));
    }

    #[test]
    fn illegal_edge_leaves_record_untouched() {
        let mut d = created();
        let before = d.clone();
        let err = d.deploy_succeeded(ContainerId::new("c1")).unwrap_err();
        assert!(matches!(err, DeployError::InvalidTransition { .. }));
        assert_eq!(d, before);
    }

    #[test]
    fn logs_are_appended_in_order() {
        let mut d = created();
        d.start_build().unwrap();
        let header = d.build_log().to_string();
        d.append_build_log("one");
        d.append_build_log("two\n");
        d.build_failed("boom").unwrap();

        assert!(d.build_log().starts_with(&header));
        assert!(d.build_log().ends_with("one\ntwo\nError: boom\n"));
    }

    #[test]
    fn cancel_notes_the_active_phase_log() {
        let mut d = created();
        d.start_build().unwrap();
        d.build_succeeded(ImageRef::parse("app:1").unwrap(), None)
            .unwrap();
        d.cancel("Cancelled by user").unwrap();
        assert_eq!(d.deploy_log(), "Cancelled by user\n");
        assert_eq!(d.status(), DeploymentStatus::Cancelled);
    }
}
