// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// The field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "intersmash";

/// Labels put on every object the engine creates
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const MANAGED_BY_VALUE: &str = "intersmash";
    /// Name of the application descriptor that owns the object
    pub const APPLICATION: &str = "intersmash.io/application";
}

/// Environment variable names read by [`crate::config::Config`]
pub mod env {
    pub const PREFIX: &str = "INTERSMASH_";
    pub const NAMESPACE: &str = "INTERSMASH_NAMESPACE";
    pub const MARKETPLACE_NAMESPACE: &str = "INTERSMASH_MARKETPLACE_NAMESPACE";
    pub const CATALOG_SOURCE: &str = "INTERSMASH_CATALOG_SOURCE";
    pub const ADMIN_CLI: &str = "INTERSMASH_ADMIN_CLI";
    pub const POLL_INTERVAL_SECS: &str = "INTERSMASH_POLL_INTERVAL_SECS";
    pub const SUBSCRIPTION_TIMEOUT_SECS: &str = "INTERSMASH_SUBSCRIPTION_TIMEOUT_SECS";
    pub const READY_TIMEOUT_SECS: &str = "INTERSMASH_READY_TIMEOUT_SECS";
    pub const DELETION_TIMEOUT_SECS: &str = "INTERSMASH_DELETION_TIMEOUT_SECS";
}

/// Fallback values for unset configuration
pub mod defaults {
    pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";
    pub const CATALOG_SOURCE: &str = "redhat-operators";
    pub const ADMIN_CLI: &str = "oc";
    pub const POLL_INTERVAL_SECS: u64 = 2;
    pub const SUBSCRIPTION_TIMEOUT_SECS: u64 = 300;
    pub const READY_TIMEOUT_SECS: u64 = 600;
    pub const DELETION_TIMEOUT_SECS: u64 = 300;
}

/// OLM object conventions
pub mod olm {
    pub const CSV_PHASE_SUCCEEDED: &str = "Succeeded";
    pub const CSV_PHASE_FAILED: &str = "Failed";
    pub const CATALOG_READY_STATE: &str = "READY";
    pub const CATALOG_SOURCE_TYPE: &str = "grpc";
    /// Label the package server puts on package manifests
    pub const PACKAGE_CATALOG_LABEL: &str = "catalog";
    pub const OPERATOR_GROUP_NAME: &str = "intersmash-operators";
}

/// CRD establishment polling
pub mod crd {
    /// Cap for the exponential backoff while waiting for CRDs
    pub const POLL_MAX_INTERVAL_SECS: u64 = 30;
}
