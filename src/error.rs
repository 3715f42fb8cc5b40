// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Could not resolve operator package '{package}': {reason}")]
    ResolutionError { package: String, reason: String },

    #[error("Subscription {namespace}/{subscription} failed (csv: {csv}): {reason}")]
    SubscriptionFailed {
        subscription: String,
        namespace: String,
        csv: String,
        reason: String,
    },

    #[error("Timed out waiting for {waited_for} ({namespace}/{resource}){}", last_observed_suffix(.last_observed))]
    WaitTimeout {
        resource: String,
        namespace: String,
        waited_for: String,
        last_observed: Option<String>,
    },

    #[error("Aborted waiting for {waited_for} ({namespace}/{resource}): {event}")]
    WaitAborted {
        resource: String,
        namespace: String,
        waited_for: String,
        event: String,
    },

    #[error("Operation '{operation}' is not supported for {resource}")]
    UnsupportedOperation { operation: String, resource: String },

    #[error("No provisioner registered for application '{name}' of kind '{kind}'")]
    UnsupportedApplicationType { name: String, kind: String },

    #[error("Factory '{new}' claims kind '{kind}' which is already handled by '{existing}'")]
    AmbiguousFactory {
        kind: String,
        existing: String,
        new: String,
    },

    #[error("Cannot {operation} {resource} while it is {state}")]
    InvalidLifecycle {
        resource: String,
        state: String,
        operation: String,
    },
}

fn last_observed_suffix(last_observed: &Option<String>) -> String {
    last_observed
        .as_ref()
        .map(|s| format!(", last observed: {}", s))
        .unwrap_or_default()
}

impl ProvisionError {
    /// Whether a condition predicate failing with this error may simply be polled again.
    ///
    /// The set is closed: API statuses 404, 409, 429 and 5xx gateway/server errors,
    /// transport failures and nested timeouts. Everything else aborts a wait.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisionError::KubeError(kube::Error::Api(resp)) => {
                matches!(resp.code, 404 | 409 | 429 | 500 | 502 | 503 | 504)
            }
            ProvisionError::KubeError(kube::Error::HyperError(_))
            | ProvisionError::KubeError(kube::Error::Service(_)) => true,
            ProvisionError::WaitTimeout { .. } => true,
            _ => false,
        }
    }

    /// Whether this wraps a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProvisionError::KubeError(kube::Error::Api(resp)) if resp.code == 404)
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
