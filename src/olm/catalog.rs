// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Resolution of the catalog source, channel and package an operator is installed from.

use crate::config::{Config, OperatorOverrides};
use crate::constants::{labels, olm, FIELD_MANAGER};
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{delete_if_exists, ensure_namespace_exists};
use crate::types::olm::{CatalogSource, CatalogSourceSpec, PackageManifest};
use crate::waiter::Waiter;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams},
    Api, Client,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where an operator package is installed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCoordinates {
    pub catalog_source: String,
    pub catalog_source_namespace: String,
    /// Set when the catalog source was created by us from an index image
    pub index_image: Option<String>,
    pub channel: String,
    pub package: String,
}

impl CatalogCoordinates {
    /// Whether the catalog source belongs to the provisioner and must be removed on dismissal
    pub fn owns_catalog_source(&self) -> bool {
        self.index_image.is_some()
    }
}

pub struct CatalogSourceResolver {
    client: Client,
    config: Arc<Config>,
}

impl CatalogSourceResolver {
    pub fn new(client: Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    /// Resolve the coordinates of `package`, honouring the product overrides.
    ///
    /// With an index image override a catalog source serving that image is applied in the
    /// provisioning namespace and awaited. Resolving twice yields the same coordinates and
    /// never a second catalog source. If resolution then fails, the applied catalog source
    /// is removed again.
    #[instrument(skip(self, overrides))]
    pub async fn resolve(&self, package: &str, overrides: &OperatorOverrides) -> Result<CatalogCoordinates> {
        let package_name = overrides.package_manifest.clone().unwrap_or_else(|| package.to_string());

        let (catalog_source, catalog_source_namespace) = match &overrides.index_image {
            Some(_) => (
                overrides
                    .catalog_source
                    .clone()
                    .unwrap_or_else(|| format!("{}-catalog", package)),
                self.config.namespace.clone(),
            ),
            None => (
                overrides
                    .catalog_source
                    .clone()
                    .unwrap_or_else(|| self.config.default_catalog_source.clone()),
                overrides
                    .catalog_source_namespace
                    .clone()
                    .unwrap_or_else(|| self.config.marketplace_namespace.clone()),
            ),
        };

        let selected = self
            .locate_channel(&package_name, &catalog_source, &catalog_source_namespace, overrides)
            .await;
        let channel = match selected {
            Ok(channel) => channel,
            Err(e) => {
                if overrides.index_image.is_some() {
                    self.delete_catalog_source(&catalog_source, &catalog_source_namespace).await;
                }
                return Err(e);
            }
        };

        let coordinates = CatalogCoordinates {
            catalog_source,
            catalog_source_namespace,
            index_image: overrides.index_image.clone(),
            channel,
            package: package_name,
        };
        info!(
            "Resolved {} to channel {} of {}/{}",
            coordinates.package,
            coordinates.channel,
            coordinates.catalog_source_namespace,
            coordinates.catalog_source
        );
        Ok(coordinates)
    }

    /// Apply the index image catalog if one is configured, then pick the channel from its package manifest
    async fn locate_channel(
        &self,
        package: &str,
        catalog: &str,
        namespace: &str,
        overrides: &OperatorOverrides,
    ) -> Result<String> {
        if let Some(image) = &overrides.index_image {
            self.apply_catalog_source(catalog, namespace, image).await?;
        }
        let manifest = self.find_package_manifest(package, catalog, namespace).await?;
        select_channel(&manifest, package, overrides.channel.as_deref())
    }

    /// Best-effort removal of a catalog source applied during a failed resolution
    async fn delete_catalog_source(&self, name: &str, namespace: &str) {
        let sources: Api<CatalogSource> = Api::namespaced(self.client.clone(), namespace);
        match delete_if_exists(&sources, name, &DeleteParams::default()).await {
            Ok(true) => info!("Deleted catalog source {} after failed resolution", name),
            Ok(false) => {}
            Err(e) => warn!("Failed to delete catalog source {}/{}: {}", namespace, name, e),
        }
    }

    /// Remove the catalog source created for an index image, if any
    #[instrument(skip(self, coordinates), fields(catalog = %coordinates.catalog_source))]
    pub async fn release(&self, coordinates: &CatalogCoordinates) -> Result<()> {
        if !coordinates.owns_catalog_source() {
            return Ok(());
        }
        let sources: Api<CatalogSource> =
            Api::namespaced(self.client.clone(), &coordinates.catalog_source_namespace);
        if delete_if_exists(&sources, &coordinates.catalog_source, &DeleteParams::default()).await? {
            info!("Deleted catalog source {}", coordinates.catalog_source);
        }
        Ok(())
    }

    async fn apply_catalog_source(&self, name: &str, namespace: &str, image: &str) -> Result<()> {
        let sources: Api<CatalogSource> = Api::namespaced(self.client.clone(), namespace);
        let source = CatalogSource {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    labels::MANAGED_BY.to_string(),
                    labels::MANAGED_BY_VALUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: CatalogSourceSpec {
                source_type: olm::CATALOG_SOURCE_TYPE.to_string(),
                image: Some(image.to_string()),
                display_name: Some(format!("{} (intersmash)", name)),
                publisher: Some(labels::MANAGED_BY_VALUE.to_string()),
            },
            status: None,
        };

        ensure_namespace_exists(&self.client, namespace).await?;
        debug!("Applying catalog source {}/{} for {}", namespace, name, image);
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        sources.patch(name, &pp, &Patch::Apply(&source)).await?;

        let waited_for = format!("catalog source {} to be {}", name, olm::CATALOG_READY_STATE);
        Waiter::new(waited_for.clone())
            .timeout(self.config.subscription_timeout)
            .interval(self.config.poll_interval)
            .wait(|| {
                let sources = sources.clone();
                async move {
                    Ok(sources
                        .get_opt(name)
                        .await?
                        .is_some_and(|source| source.is_ready()))
                }
            })
            .await
            .into_result(name, namespace, &waited_for)
    }

    async fn find_package_manifest(&self, package: &str, catalog: &str, namespace: &str) -> Result<PackageManifest> {
        let manifests: Api<PackageManifest> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{}={}", olm::PACKAGE_CATALOG_LABEL, catalog);

        manifests
            .list(&ListParams::default().labels(&selector))
            .await?
            .items
            .into_iter()
            .find(|m| m.metadata.name.as_deref() == Some(package))
            .ok_or_else(|| ProvisionError::ResolutionError {
                package: package.to_string(),
                reason: format!("no package manifest in catalog {}/{}", namespace, catalog),
            })
    }
}

/// The requested channel if the manifest offers it, otherwise the manifest's default
fn select_channel(manifest: &PackageManifest, package: &str, requested: Option<&str>) -> Result<String> {
    let offered: Vec<&str> = manifest
        .status
        .as_ref()
        .map(|s| s.channels.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();

    match requested {
        Some(channel) if offered.is_empty() || offered.contains(&channel) => Ok(channel.to_string()),
        Some(channel) => Err(ProvisionError::ResolutionError {
            package: package.to_string(),
            reason: format!("channel {} not offered (available: {})", channel, offered.join(", ")),
        }),
        None => manifest
            .default_channel()
            .map(str::to_string)
            .ok_or_else(|| ProvisionError::ResolutionError {
                package: package.to_string(),
                reason: "package manifest declares no default channel".to_string(),
            }),
    }
}
