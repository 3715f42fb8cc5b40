// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Provisioning namespace bootstrap

use crate::constants::labels;
use crate::error::Result;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Create `namespace` labelled as managed by intersmash unless it already exists.
///
/// Losing a creation race to a concurrent provisioner counts as success.
#[instrument(skip(client))]
pub async fn ensure_namespace_exists(client: &Client, namespace: &str) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    if namespaces.get_opt(namespace).await?.is_some() {
        debug!("Namespace {} present", namespace);
        return Ok(());
    }

    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                labels::MANAGED_BY.to_string(),
                labels::MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => info!("Created namespace {}", namespace),
        Err(kube::Error::Api(resp)) if resp.code == 409 => debug!("Namespace {} created concurrently", namespace),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
