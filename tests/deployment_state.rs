// ABOUTME: Property tests for the deployment status transition table.
// ABOUTME: Random event sequences never leave a terminal state or skip a phase.

use mikrocloud::deploy::{
    DeployErrorKind, DeploymentEvent, DeploymentStatus, NewDeployment, Trigger,
};
use mikrocloud::types::{ApplicationId, ContainerId, ImageRef};
use proptest::prelude::*;

fn any_event() -> impl Strategy<Value = DeploymentEvent> {
    prop_oneof![
        Just(DeploymentEvent::StartBuild),
        Just(DeploymentEvent::BuildSucceeded),
        Just(DeploymentEvent::BuildFailed),
        Just(DeploymentEvent::DeploySucceeded),
        Just(DeploymentEvent::DeployFailed),
        Just(DeploymentEvent::Stop),
        Just(DeploymentEvent::Cancel),
    ]
}

fn any_status() -> impl Strategy<Value = DeploymentStatus> {
    proptest::sample::select(DeploymentStatus::ALL.to_vec())
}

/// Position along the happy path; terminal states sit past every phase.
fn rank(status: DeploymentStatus) -> u8 {
    match status {
        DeploymentStatus::Created => 0,
        DeploymentStatus::Building => 1,
        DeploymentStatus::Deploying => 2,
        DeploymentStatus::Running => 3,
        DeploymentStatus::Failed | DeploymentStatus::Cancelled | DeploymentStatus::Stopped => 4,
    }
}

proptest! {
    #[test]
    fn terminal_states_accept_no_event(status in any_status(), event in any_event()) {
        if status.is_terminal() {
            prop_assert_eq!(status.next(event), None);
        }
    }

    #[test]
    fn transitions_only_move_forward(status in any_status(), event in any_event()) {
        if let Some(next) = status.next(event) {
            prop_assert!(rank(next) > rank(status), "{} -> {}", status, next);
        }
    }

    #[test]
    fn deployment_applies_only_table_edges(events in proptest::collection::vec(any_event(), 0..12)) {
        let mut deployment =
            NewDeployment::new(ApplicationId::new("app"), Trigger::push()).into_deployment(1);
        let image = ImageRef::parse("acme/app:1").unwrap();

        for event in events {
            let before = deployment.status();
            let expected = before.next(event);
            let outcome = match event {
                DeploymentEvent::StartBuild => deployment.start_build(),
                DeploymentEvent::BuildSucceeded => deployment.build_succeeded(image.clone(), None),
                DeploymentEvent::BuildFailed => deployment.build_failed("boom"),
                DeploymentEvent::DeploySucceeded => {
                    deployment.deploy_succeeded(ContainerId::new("c1"))
                }
                DeploymentEvent::DeployFailed => deployment.deploy_failed("boom"),
                DeploymentEvent::Stop => deployment.stop("stopped"),
                DeploymentEvent::Cancel => deployment.cancel("cancelled"),
            };

            match expected {
                Some(next) => {
                    prop_assert!(outcome.is_ok());
                    prop_assert_eq!(deployment.status(), next);
                }
                None => {
                    let err = outcome.unwrap_err();
                    prop_assert_eq!(err.kind(), DeployErrorKind::InvalidTransition);
                    prop_assert_eq!(deployment.status(), before);
                }
            }
        }
    }
}

/// Test: Every non-terminal state can still be cancelled or finish.
#[test]
fn every_live_state_has_an_exit() {
    for status in DeploymentStatus::ALL {
        if status.is_terminal() {
            continue;
        }
        let exits = [
            DeploymentEvent::Cancel,
            DeploymentEvent::Stop,
            DeploymentEvent::BuildFailed,
            DeploymentEvent::DeployFailed,
        ];
        assert!(
            exits
                .iter()
                .any(|e| status.next(*e).is_some_and(DeploymentStatus::is_terminal)),
            "{status} has no way to a terminal state"
        );
    }
}

/// Test: Status names are the lowercase words used on the wire.
#[test]
fn status_serializes_lowercase() {
    let json = serde_json::to_string(&DeploymentStatus::Deploying).unwrap();
    assert_eq!(json, "\"deploying\"");
    let back: DeploymentStatus = serde_json::from_str("\"cancelled\"").unwrap();
    assert_eq!(back, DeploymentStatus::Cancelled);
}
