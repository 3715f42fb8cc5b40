// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Provisioner lifecycle state machine

use crate::error::{ProvisionError, Result};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    PreDeployed,
    Deployed,
    /// Deploy failed part way; cluster objects may exist and still need an undeploy
    DeployFailed,
    /// Undeploy failed part way; cleanup may still run, or undeploy may be retried
    UndeployFailed,
    Undeployed,
    PostUndeployed,
    Dismissed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configured => "configured",
            LifecycleState::PreDeployed => "pre-deployed",
            LifecycleState::Deployed => "deployed",
            LifecycleState::DeployFailed => "deploy-failed",
            LifecycleState::UndeployFailed => "undeploy-failed",
            LifecycleState::Undeployed => "undeployed",
            LifecycleState::PostUndeployed => "post-undeployed",
            LifecycleState::Dismissed => "dismissed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Configure,
    PreDeploy,
    Deploy,
    Scale,
    Undeploy,
    PostUndeploy,
    Dismiss,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Configure => "configure",
            Operation::PreDeploy => "pre-deploy",
            Operation::Deploy => "deploy",
            Operation::Scale => "scale",
            Operation::Undeploy => "undeploy",
            Operation::PostUndeploy => "post-undeploy",
            Operation::Dismiss => "dismiss",
        };
        f.write_str(s)
    }
}

impl LifecycleState {
    /// Whether `operation` may run in this state
    pub fn allows(self, operation: Operation) -> bool {
        use LifecycleState::*;

        match operation {
            Operation::Configure => matches!(self, Unconfigured | Configured),
            Operation::PreDeploy => matches!(self, Configured | PreDeployed | PostUndeployed),
            Operation::Deploy => matches!(self, PreDeployed | Undeployed),
            Operation::Scale => self == Deployed,
            Operation::Undeploy => matches!(self, Deployed | DeployFailed | UndeployFailed),
            Operation::PostUndeploy => {
                matches!(self, Configured | PreDeployed | UndeployFailed | Undeployed | PostUndeployed)
            }
            Operation::Dismiss => !matches!(self, Deployed | DeployFailed),
        }
    }
}

/// Tracks where a provisioner is in its lifecycle and rejects out-of-order calls.
///
/// A deploy (successful or not) must be followed by an undeploy attempt before the
/// prerequisites are released or the provisioner is dismissed. A failed undeploy still
/// unlocks that cleanup. Dropping it in between logs a warning.
#[derive(Debug)]
pub struct Lifecycle {
    resource: String,
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            state: LifecycleState::Unconfigured,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn allows(&self, operation: Operation) -> bool {
        self.state.allows(operation)
    }

    /// Fail with [`ProvisionError::InvalidLifecycle`] unless `operation` may run now
    pub fn check(&self, operation: Operation) -> Result<()> {
        if self.allows(operation) {
            Ok(())
        } else {
            Err(ProvisionError::InvalidLifecycle {
                resource: self.resource.clone(),
                state: self.state.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    /// Record the outcome of `operation`.
    ///
    /// Cleanup operations always advance since every step was attempted. A failed deploy or
    /// undeploy moves to its failed state; other failures leave the state unchanged.
    pub fn finish<T>(&mut self, operation: Operation, outcome: &Result<T>) {
        let ok = outcome.is_ok();
        self.state = match (operation, ok) {
            (Operation::Configure, true) => LifecycleState::Configured,
            (Operation::PreDeploy, true) => LifecycleState::PreDeployed,
            (Operation::Deploy, true) => LifecycleState::Deployed,
            (Operation::Deploy, false) => LifecycleState::DeployFailed,
            (Operation::Undeploy, true) => LifecycleState::Undeployed,
            (Operation::Undeploy, false) => LifecycleState::UndeployFailed,
            (Operation::PostUndeploy, _) => LifecycleState::PostUndeployed,
            (Operation::Dismiss, _) => LifecycleState::Dismissed,
            _ => self.state,
        };
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if matches!(
            self.state,
            LifecycleState::Deployed | LifecycleState::DeployFailed | LifecycleState::UndeployFailed
        ) {
            warn!(
                "Provisioner for {} dropped while {}; its resources may still be running",
                self.resource, self.state
            );
        }
    }
}
