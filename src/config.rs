// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{defaults, env as keys};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Provisioning configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace all provisioned products are deployed to
    pub namespace: String,
    /// Namespace holding the cluster's default catalog sources and package manifests
    pub marketplace_namespace: String,
    /// Catalog source used when a product has no override
    pub default_catalog_source: String,
    /// Cluster CLI binary used for manifest passthrough
    pub admin_cli: String,
    pub poll_interval: Duration,
    pub subscription_timeout: Duration,
    pub ready_timeout: Duration,
    pub deletion_timeout: Duration,
    /// Snapshot of every `INTERSMASH_` variable, consulted for per-product overrides
    vars: HashMap<String, String>,
}

/// Per-product operator overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorOverrides {
    pub catalog_source: Option<String>,
    pub catalog_source_namespace: Option<String>,
    pub index_image: Option<String>,
    pub channel: Option<String>,
    pub package_manifest: Option<String>,
    pub image: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    /// Build configuration from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(keys::PREFIX))
            .collect();

        let namespace = vars
            .get(keys::NAMESPACE)
            .cloned()
            .context("INTERSMASH_NAMESPACE environment variable not set")?;

        let text = |key: &str, default: &str| {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };
        let secs = |key: &str, default: u64| -> Result<Duration> {
            match vars.get(key) {
                Some(v) => v
                    .parse()
                    .map(Duration::from_secs)
                    .with_context(|| format!("{} must be a number of seconds, got '{}'", key, v)),
                None => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Config {
            marketplace_namespace: text(keys::MARKETPLACE_NAMESPACE, defaults::MARKETPLACE_NAMESPACE),
            default_catalog_source: text(keys::CATALOG_SOURCE, defaults::CATALOG_SOURCE),
            admin_cli: text(keys::ADMIN_CLI, defaults::ADMIN_CLI),
            poll_interval: secs(keys::POLL_INTERVAL_SECS, defaults::POLL_INTERVAL_SECS)?,
            subscription_timeout: secs(
                keys::SUBSCRIPTION_TIMEOUT_SECS,
                defaults::SUBSCRIPTION_TIMEOUT_SECS,
            )?,
            ready_timeout: secs(keys::READY_TIMEOUT_SECS, defaults::READY_TIMEOUT_SECS)?,
            deletion_timeout: secs(keys::DELETION_TIMEOUT_SECS, defaults::DELETION_TIMEOUT_SECS)?,
            namespace,
            vars,
        })
    }

    /// Overrides configured for a product, e.g. `INTERSMASH_KEYCLOAK_OPERATOR_CHANNEL`
    pub fn operator_overrides(&self, product: &str) -> OperatorOverrides {
        let prefix = format!(
            "{}{}_OPERATOR_",
            keys::PREFIX,
            product.to_uppercase().replace(['-', '.'], "_")
        );
        let get = |field: &str| {
            self.vars
                .get(&format!("{}{}", prefix, field))
                .filter(|v| !v.trim().is_empty())
                .cloned()
        };

        OperatorOverrides {
            catalog_source: get("CATALOG_SOURCE"),
            catalog_source_namespace: get("CATALOG_SOURCE_NAMESPACE"),
            index_image: get("INDEX_IMAGE"),
            channel: get("CHANNEL"),
            package_manifest: get("PACKAGE_MANIFEST"),
            image: get("IMAGE"),
        }
    }
}
