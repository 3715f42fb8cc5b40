// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Provisioner for operator-backed products: subscribe to the operator, then drive its custom resources.

use crate::config::OperatorOverrides;
use crate::constants::{labels, FIELD_MANAGER};
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{delete_if_exists, pods::list_pods, wait_for_crds, wait_for_ready_pods, PodWait};
use crate::olm::{CatalogSourceResolver, SubscriptionManager, SubscriptionState};
use crate::provisioner::{
    apply_prerequisites, merge_patch_at, release_prerequisites, service_url, validate_replicas, Lifecycle,
    LifecycleState, Operation, Provisioner, ProvisioningContext,
};
use crate::types::application::{Application, OperatorApplication};
use crate::waiter::{EventFailFast, FailFast};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, DynamicObject, Patch, PatchParams},
    Api, ResourceExt,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

pub struct OperatorProvisioner {
    application: Arc<dyn Application>,
    operator: Arc<dyn OperatorApplication>,
    ctx: ProvisioningContext,
    overrides: OperatorOverrides,
    resolver: CatalogSourceResolver,
    subscription: Option<SubscriptionManager>,
    lifecycle: Lifecycle,
}

impl OperatorProvisioner {
    /// Returns `UnsupportedApplicationType` unless `application` is operator-backed
    pub fn new(application: Arc<dyn Application>, ctx: ProvisioningContext) -> Result<Self> {
        let operator = application
            .clone()
            .into_operator()
            .ok_or_else(|| ProvisionError::UnsupportedApplicationType {
                name: application.name().to_string(),
                kind: application.kind().to_string(),
            })?;

        Ok(Self {
            overrides: ctx.config.operator_overrides(operator.product()),
            resolver: CatalogSourceResolver::new(ctx.client.clone(), ctx.config.clone()),
            lifecycle: Lifecycle::new(application.name()),
            subscription: None,
            application,
            operator,
            ctx,
        })
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription
            .as_ref()
            .map_or(SubscriptionState::NotSubscribed, |s| s.state())
    }

    /// Subscribe to the operator and wait for its CSV. Requires a configured provisioner.
    pub async fn subscribe(&mut self, fail_fast: Option<&dyn FailFast>) -> Result<String> {
        let approval = self.operator.install_plan_approval();
        let env = self.operator.operator_env();
        let subscription = self.subscription_mut("subscribe")?;
        subscription.subscribe(approval, &env, fail_fast).await
    }

    /// Remove the operator subscription; a no-op when not subscribed
    pub async fn unsubscribe(&mut self) -> Result<()> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.unsubscribe().await,
            None => Ok(()),
        }
    }

    fn subscription_mut(&mut self, operation: &str) -> Result<&mut SubscriptionManager> {
        let state = self.lifecycle.state();
        let resource = self.application.name().to_string();
        self.subscription
            .as_mut()
            .ok_or_else(|| ProvisionError::InvalidLifecycle {
                resource,
                state: state.to_string(),
                operation: operation.to_string(),
            })
    }

    fn pod_api(&self) -> Api<Pod> {
        Api::namespaced(self.ctx.client.clone(), self.ctx.namespace())
    }

    fn pod_wait<'a>(&self, fail_fast: Option<&'a dyn FailFast>, deleting: bool) -> PodWait<'a> {
        PodWait {
            timeout: if deleting {
                self.ctx.config.deletion_timeout
            } else {
                self.ctx.config.ready_timeout
            },
            interval: self.ctx.config.poll_interval,
            fail_fast,
        }
    }

    /// The custom resources with namespace and labels set, the first one carrying the replica count
    fn prepared_resources(&self) -> Result<Vec<DynamicObject>> {
        let mut resources = self.operator.custom_resources();
        let name = self.application.name();

        for resource in resources.iter_mut() {
            resource.metadata.namespace = Some(self.ctx.namespace().to_string());
            let resource_labels = resource.metadata.labels.get_or_insert_with(Default::default);
            resource_labels.insert(labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string());
            resource_labels.insert(labels::APPLICATION.to_string(), name.to_string());
        }

        if let (Some(primary), Some(pointer)) = (resources.first_mut(), self.operator.replicas_pointer()) {
            let patch = merge_patch_at(&pointer, json!(self.operator.replicas()));
            merge_into(&mut primary.data, patch);
        }
        if resources.iter().any(|r| r.metadata.name.is_none()) {
            return Err(ProvisionError::ConfigError(format!(
                "{}: every custom resource needs metadata.name",
                name
            )));
        }
        Ok(resources)
    }

    async fn deploy_resources(&mut self) -> Result<()> {
        let name = self.application.name().to_string();
        let namespace = self.ctx.namespace().to_string();
        let fail_fast = EventFailFast::since_latest_event(self.ctx.client.clone(), &namespace, &name).await?;

        if let Err(e) = self.subscribe(Some(&fail_fast)).await {
            error!("Subscribing to {} failed: {}", self.operator.package(), e);
            if let Err(cleanup) = self.unsubscribe().await {
                warn!("Cleanup after failed subscription of {} failed: {}", name, cleanup);
            }
            return Err(e);
        }

        let crds = match &self.subscription {
            Some(subscription) => subscription.owned_crds().await?,
            None => Vec::new(),
        };
        wait_for_crds(
            &self.ctx.client,
            &crds,
            &namespace,
            self.ctx.config.subscription_timeout,
            self.ctx.config.poll_interval,
        )
        .await?;

        let pp = PatchParams::apply(FIELD_MANAGER).force();
        for resource in self.prepared_resources()? {
            let api = self.ctx.clients.dynamic_api(&resource, &namespace).await?;
            api.patch(&resource.name_any(), &pp, &Patch::Apply(&resource)).await?;
            info!("Applied custom resource {}/{}", namespace, resource.name_any());
        }

        let replicas = validate_replicas(self.operator.replicas(), &name)?;
        wait_for_ready_pods(
            &self.pod_api(),
            &self.operator.pod_selector(),
            replicas,
            &name,
            self.pod_wait(Some(&fail_fast), false),
        )
        .await
    }

    async fn scale_primary(&self, replicas: i32, wait: bool) -> Result<()> {
        let name = self.application.name();
        let pointer = self
            .operator
            .replicas_pointer()
            .ok_or_else(|| ProvisionError::UnsupportedOperation {
                operation: "scale".to_string(),
                resource: name.to_string(),
            })?;
        let count = validate_replicas(replicas, name)?;
        let primary = self
            .prepared_resources()?
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::UnsupportedOperation {
                operation: "scale".to_string(),
                resource: name.to_string(),
            })?;

        let api = self.ctx.clients.dynamic_api(&primary, self.ctx.namespace()).await?;
        let patch = merge_patch_at(&pointer, json!(replicas));
        api.patch(&primary.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Scaled {} to {} replicas", name, replicas);

        if wait {
            wait_for_ready_pods(
                &self.pod_api(),
                &self.operator.pod_selector(),
                count,
                name,
                self.pod_wait(None, false),
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_resources(&self) -> Result<()> {
        let name = self.application.name();
        let namespace = self.ctx.namespace();

        for resource in self.prepared_resources()?.iter().rev() {
            let api = match self.ctx.clients.dynamic_api(resource, namespace).await {
                Ok(api) => api,
                // Without a CRD no instance can exist
                Err(ProvisionError::ResolutionError { reason, .. }) => {
                    debug!("Skipping {}: {}", resource.name_any(), reason);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if delete_if_exists(&api, &resource.name_any(), &DeleteParams::foreground()).await? {
                info!("Deleted custom resource {}/{}", namespace, resource.name_any());
            }
        }

        wait_for_ready_pods(
            &self.pod_api(),
            &self.operator.pod_selector(),
            0,
            name,
            self.pod_wait(None, true),
        )
        .await
    }
}

/// Deep-merge `patch` into `target`, keeping keys the patch does not mention
fn merge_into(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                merge_into(target.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

#[async_trait]
impl Provisioner for OperatorProvisioner {
    fn application(&self) -> Arc<dyn Application> {
        self.application.clone()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn configure(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Configure)?;
        let result = self
            .resolver
            .resolve(self.operator.package(), &self.overrides)
            .await
            .map(|coordinates| {
                self.subscription = Some(SubscriptionManager::new(
                    self.ctx.client.clone(),
                    self.ctx.config.clone(),
                    coordinates,
                ));
            });
        self.lifecycle.finish(Operation::Configure, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn pre_deploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::PreDeploy)?;
        let result = apply_prerequisites(&self.ctx, self.application.as_ref()).await;
        self.lifecycle.finish(Operation::PreDeploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn deploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Deploy)?;
        let result = self.deploy_resources().await;
        self.lifecycle.finish(Operation::Deploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn scale(&mut self, replicas: i32, wait: bool) -> Result<()> {
        self.lifecycle.check(Operation::Scale)?;
        let result = self.scale_primary(replicas, wait).await;
        self.lifecycle.finish(Operation::Scale, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn undeploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Undeploy)?;
        let result = self.delete_resources().await;
        self.lifecycle.finish(Operation::Undeploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn post_undeploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::PostUndeploy)?;
        let mut first_error = release_prerequisites(&self.ctx, self.application.as_ref()).await.err();

        if let Err(e) = self.unsubscribe().await {
            warn!("Unsubscribing {} failed: {}", self.operator.package(), e);
            first_error.get_or_insert(e);
        }

        let result = first_error.map_or(Ok(()), Err);
        self.lifecycle.finish(Operation::PostUndeploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn dismiss(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Dismiss)?;
        let mut first_error = None;

        if let Err(e) = self.unsubscribe().await {
            warn!("Unsubscribing {} failed: {}", self.operator.package(), e);
            first_error.get_or_insert(e);
        }
        if let Some(subscription) = &self.subscription {
            if let Err(e) = self.resolver.release(subscription.coordinates()).await {
                warn!("Removing catalog source for {} failed: {}", self.operator.package(), e);
                first_error.get_or_insert(e);
            }
        }

        let result = first_error.map_or(Ok(()), Err);
        self.lifecycle.finish(Operation::Dismiss, &result);
        result
    }

    async fn pods(&self) -> Result<Vec<Pod>> {
        list_pods(&self.pod_api(), &self.operator.pod_selector()).await
    }

    fn url(&self) -> Result<Url> {
        service_url(self.application.as_ref(), self.ctx.namespace())
    }
}
