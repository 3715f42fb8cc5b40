// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The provisioning lifecycle contract and its operator and image backed implementations.

pub mod image;
pub mod lifecycle;
pub mod operator;
pub mod registry;

pub use image::ImageProvisioner;
pub use lifecycle::{Lifecycle, LifecycleState, Operation};
pub use operator::OperatorProvisioner;
pub use registry::{ProvisionerFactory, ProvisionerRegistry};

use crate::config::Config;
use crate::constants::FIELD_MANAGER;
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{delete_if_exists, ensure_namespace_exists, ClientRegistry};
use crate::types::application::Application;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use kube::{
    api::{DeleteParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Shared collaborators handed to every provisioner
#[derive(Clone)]
pub struct ProvisioningContext {
    pub client: Client,
    pub config: Arc<Config>,
    pub clients: Arc<ClientRegistry>,
}

impl ProvisioningContext {
    pub fn new(client: Client, config: Config) -> Self {
        // Built-in kinds a descriptor may list among its custom resources; they have no CRD
        let clients = ClientRegistry::new(client.clone());
        clients
            .register::<ConfigMap>()
            .register::<Secret>()
            .register::<Service>()
            .register::<Deployment>()
            .register::<StatefulSet>();

        Self {
            client,
            config: Arc::new(config),
            clients: Arc::new(clients),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }
}

/// Lifecycle contract every provisioner implements.
///
/// Calls must follow `configure → pre_deploy → deploy → scale* → undeploy → post_undeploy → dismiss`;
/// out-of-order calls fail with [`ProvisionError::InvalidLifecycle`].
#[async_trait]
pub trait Provisioner: Send {
    fn application(&self) -> Arc<dyn Application>;

    fn state(&self) -> LifecycleState;

    /// Resolve catalog sources and images
    async fn configure(&mut self) -> Result<()>;

    /// Ensure the namespace and create the application's secrets and config maps
    async fn pre_deploy(&mut self) -> Result<()>;

    async fn deploy(&mut self) -> Result<()>;

    /// Change the desired replicas; with `wait`, block until exactly that many pods are ready
    async fn scale(&mut self, replicas: i32, wait: bool) -> Result<()>;

    /// Delete the workload and wait until no pods remain
    async fn undeploy(&mut self) -> Result<()>;

    async fn post_undeploy(&mut self) -> Result<()>;

    async fn dismiss(&mut self) -> Result<()>;

    async fn pods(&self) -> Result<Vec<Pod>>;

    /// In-cluster URL of the application's service
    fn url(&self) -> Result<Url>;
}

/// Run every cleanup step the provisioner's state still permits.
///
/// Usable after a failure at any point of the lifecycle: each step runs even if an earlier
/// one failed, and the first error is returned at the end.
pub async fn teardown(provisioner: &mut dyn Provisioner) -> Result<()> {
    let name = provisioner.application().name().to_string();
    let mut first_error = None;

    for operation in [Operation::Undeploy, Operation::PostUndeploy, Operation::Dismiss] {
        if !provisioner.state().allows(operation) {
            debug!("Skipping {} of {} while {}", operation, name, provisioner.state());
            continue;
        }
        let result = match operation {
            Operation::Undeploy => provisioner.undeploy().await,
            Operation::PostUndeploy => provisioner.post_undeploy().await,
            _ => provisioner.dismiss().await,
        };
        if let Err(e) = result {
            warn!("{} of {} failed: {}", operation, name, e);
            first_error.get_or_insert(e);
        }
    }

    info!("Finished with {} ({})", name, provisioner.state());
    first_error.map_or(Ok(()), Err)
}

/// Apply the secrets and config maps an application declares
pub(crate) async fn apply_prerequisites(ctx: &ProvisioningContext, application: &dyn Application) -> Result<()> {
    ensure_namespace_exists(&ctx.client, ctx.namespace()).await?;
    let pp = PatchParams::apply(FIELD_MANAGER).force();

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    for secret in application.secrets() {
        secrets.patch(&secret.name_any(), &pp, &Patch::Apply(&secret)).await?;
        info!("Applied secret {}/{}", ctx.namespace(), secret.name_any());
    }

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    for config_map in application.config_maps() {
        config_maps
            .patch(&config_map.name_any(), &pp, &Patch::Apply(&config_map))
            .await?;
        info!("Applied config map {}/{}", ctx.namespace(), config_map.name_any());
    }
    Ok(())
}

/// Delete the secrets and config maps of an application.
///
/// Every object is attempted; the first failure is returned afterwards.
pub(crate) async fn release_prerequisites(ctx: &ProvisioningContext, application: &dyn Application) -> Result<()> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ctx.namespace());
    let dp = DeleteParams::default();
    let mut first_error = None;

    for secret in application.secrets() {
        if let Err(e) = delete_if_exists(&secrets, &secret.name_any(), &dp).await {
            warn!("Failed to delete secret {}: {}", secret.name_any(), e);
            first_error.get_or_insert(e);
        }
    }
    for config_map in application.config_maps() {
        if let Err(e) = delete_if_exists(&config_maps, &config_map.name_any(), &dp).await {
            warn!("Failed to delete config map {}: {}", config_map.name_any(), e);
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}

/// `http://<service>.<namespace>.svc:<port>` for applications exposing an endpoint
pub(crate) fn service_url(application: &dyn Application, namespace: &str) -> Result<Url> {
    let endpoint = application
        .endpoint()
        .ok_or_else(|| ProvisionError::UnsupportedOperation {
            operation: "url".to_string(),
            resource: application.name().to_string(),
        })?;

    let raw = format!("http://{}.{}.svc:{}", endpoint.service, namespace, endpoint.port);
    Url::parse(&raw).map_err(|e| ProvisionError::ConfigError(format!("invalid service URL {}: {}", raw, e)))
}

/// Build a merge patch setting the value at a JSON pointer such as `/spec/replicas`
pub(crate) fn merge_patch_at(pointer: &str, value: Value) -> Value {
    pointer
        .trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .rev()
        .fold(value, |inner, segment| {
            let mut object = Map::new();
            object.insert(segment.replace("~1", "/").replace("~0", "~"), inner);
            Value::Object(object)
        })
}

pub(crate) fn validate_replicas(replicas: i32, resource: &str) -> Result<usize> {
    usize::try_from(replicas)
        .map_err(|_| ProvisionError::ConfigError(format!("{}: replicas must not be negative, got {}", resource, replicas)))
}
