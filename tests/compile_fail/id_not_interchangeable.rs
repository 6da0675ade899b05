// ABOUTME: Compile-fail test verifying ContainerId and DeploymentId are not interchangeable.
// ABOUTME: This test should fail to compile, validating type safety.

use mikrocloud::types::{ContainerId, DeploymentId};

fn takes_container_id(_id: ContainerId) {}

fn main() {
    let deployment_id = DeploymentId::new("dep-1");
    takes_container_id(deployment_id); // ERROR: expected ContainerId, found DeploymentId
}
