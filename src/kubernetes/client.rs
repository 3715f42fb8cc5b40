// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Process-wide cache of API resource descriptions, shared through the provisioning context.

use crate::error::{ProvisionError, Result};
use crate::kubernetes::crd::{api_resource, find_crd};
use kube::{
    api::{DeleteParams, DynamicObject},
    core::{ApiResource, GroupVersionKind},
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, instrument};

/// Maps custom resource kinds to the [`ApiResource`] needed to build a client for them.
///
/// Kinds known at compile time are registered up front; anything else is resolved once
/// from its installed CRD and cached.
pub struct ClientRegistry {
    client: Client,
    resources: RwLock<HashMap<String, ApiResource>>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ClientRegistry")
            .field("resources", &resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

impl ClientRegistry {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Register a statically typed resource
    pub fn register<K: Resource<DynamicType = ()>>(&self) -> &Self {
        let ar = ApiResource::erase::<K>(&());
        let gvk = GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind);
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(&gvk), ar);
        self
    }

    pub fn is_known(&self, gvk: &GroupVersionKind) -> bool {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key(gvk))
    }

    /// Resolve `gvk`, consulting installed CRDs for kinds that were never registered
    #[instrument(skip(self), fields(kind = %gvk.kind))]
    pub async fn api_resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        let cached = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(gvk))
            .cloned();
        if let Some(ar) = cached {
            return Ok(ar);
        }

        let crd = find_crd(&self.client, gvk).await?.ok_or_else(|| {
            ProvisionError::ResolutionError {
                package: gvk.kind.clone(),
                reason: format!("no CRD serves {}/{} {}", gvk.group, gvk.version, gvk.kind),
            }
        })?;
        let ar = api_resource(&crd, &gvk.version);
        debug!("Discovered {} as {}", gvk.kind, ar.plural);

        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(gvk), ar.clone());
        Ok(ar)
    }

    /// Untyped client for the kind of `object` in `namespace`
    pub async fn dynamic_api(&self, object: &DynamicObject, namespace: &str) -> Result<Api<DynamicObject>> {
        let gvk = gvk_of(object)?;
        let ar = self.api_resource(&gvk).await?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
    }
}

/// Group, version and kind declared by a dynamic object
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object.types.as_ref().ok_or_else(|| {
        ProvisionError::ConfigError(format!(
            "custom resource {} has no apiVersion/kind",
            object.metadata.name.as_deref().unwrap_or("<unnamed>")
        ))
    })?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Delete `name`, treating an already missing object as success. Returns whether it existed.
pub async fn delete_if_exists<K>(api: &Api<K>, name: &str, dp: &DeleteParams) -> Result<bool>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, dp).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
        Err(e) => Err(e.into()),
    }
}
