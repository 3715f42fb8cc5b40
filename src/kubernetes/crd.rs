// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD lookup and availability checking utilities

use crate::constants::crd::POLL_MAX_INTERVAL_SECS;
use crate::error::Result;
use crate::waiter::Waiter;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::ListParams,
    core::{ApiResource, GroupVersionKind},
    Api, Client,
};
use std::time::Duration;
use tracing::debug;

/// Find the CRD serving `gvk`, if one is installed
pub async fn find_crd(client: &Client, gvk: &GroupVersionKind) -> Result<Option<CustomResourceDefinition>> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let found = crds
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .find(|crd| {
            crd.spec.group == gvk.group
                && crd.spec.names.kind == gvk.kind
                && crd.spec.versions.iter().any(|v| v.name == gvk.version && v.served)
        });

    debug!("CRD lookup for {}/{} {}: {:?}", gvk.group, gvk.version, gvk.kind, found.as_ref().map(|c| &c.metadata.name));
    Ok(found)
}

/// Check whether a CRD (by full name, `<plural>.<group>`) is installed and established
pub async fn is_crd_established(client: &Client, name: &str) -> Result<bool> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    Ok(crds.get_opt(name).await?.is_some_and(|crd| established(&crd)))
}

pub fn established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Established" && c.status == "True")
        })
}

/// Wait until every named CRD is established, backing off exponentially between checks
pub async fn wait_for_crds(
    client: &Client,
    names: &[String],
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    let waited_for = format!("CRDs {} to be established", names.join(", "));

    Waiter::new(waited_for.clone())
        .timeout(timeout)
        .interval(interval)
        .backoff(Duration::from_secs(POLL_MAX_INTERVAL_SECS))
        .wait(|| async move {
            for name in names {
                if !is_crd_established(client, name).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .await
        .into_result(&names.join(","), namespace, &waited_for)
}

/// Describe a CRD version as a dynamic API resource
pub fn api_resource(crd: &CustomResourceDefinition, version: &str) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&crd.spec.group, version, &crd.spec.names.kind);
    ApiResource::from_gvk_with_plural(&gvk, &crd.spec.names.plural)
}
