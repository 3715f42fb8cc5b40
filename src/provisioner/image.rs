// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Provisioner deploying a container image as a Deployment with an optional Service.

use crate::constants::FIELD_MANAGER;
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{delete_if_exists, pods::list_pods, wait_for_ready_pods, PodWait};
use crate::provisioner::{
    apply_prerequisites, release_prerequisites, service_url, validate_replicas, Lifecycle, LifecycleState,
    Operation, Provisioner, ProvisioningContext,
};
use crate::types::application::{application_labels, Application, ImageApplication};
use crate::waiter::{EventFailFast, FailFast};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{
    api::{DeleteParams, ObjectMeta, Patch, PatchParams},
    Api,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

const APP_LABEL: &str = "app";

pub struct ImageProvisioner {
    application: Arc<dyn Application>,
    image_app: Arc<dyn ImageApplication>,
    ctx: ProvisioningContext,
    /// Image after applying the product override
    image: String,
    lifecycle: Lifecycle,
}

impl ImageProvisioner {
    /// Returns `UnsupportedApplicationType` unless `application` is image-backed
    pub fn new(application: Arc<dyn Application>, ctx: ProvisioningContext) -> Result<Self> {
        let image_app = application
            .clone()
            .into_image()
            .ok_or_else(|| ProvisionError::UnsupportedApplicationType {
                name: application.name().to_string(),
                kind: application.kind().to_string(),
            })?;

        Ok(Self {
            image: image_app.image().to_string(),
            lifecycle: Lifecycle::new(application.name()),
            application,
            image_app,
            ctx,
        })
    }

    /// The image that is or will be deployed
    pub fn image(&self) -> &str {
        &self.image
    }

    fn selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.application.name())
    }

    fn pod_labels(&self) -> BTreeMap<String, String> {
        let mut labels = application_labels(self.application.name());
        labels.insert(APP_LABEL.to_string(), self.application.name().to_string());
        labels
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

    fn deployment(&self) -> Deployment {
        let name = self.application.name();
        let selector_labels = BTreeMap::from([(APP_LABEL.to_string(), name.to_string())]);

        let env: Vec<EnvVar> = self
            .image_app
            .env()
            .into_iter()
            .map(|(name, value)| EnvVar {
                name,
                value: Some(value),
                ..Default::default()
            })
            .collect();
        let args = self.image_app.args();

        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.ctx.namespace().to_string()),
                labels: Some(application_labels(name)),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.image_app.replicas()),
                selector: LabelSelector {
                    match_labels: Some(selector_labels),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.pod_labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: name.to_string(),
                            image: Some(self.image.clone()),
                            env: (!env.is_empty()).then_some(env),
                            args: (!args.is_empty()).then_some(args),
                            ports: self.image_app.port().map(|port| {
                                vec![ContainerPort {
                                    container_port: i32::from(port),
                                    ..Default::default()
                                }]
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(&self, port: u16) -> Service {
        let name = self.application.name();
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.ctx.namespace().to_string()),
                labels: Some(application_labels(name)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])),
                ports: Some(vec![ServicePort {
                    port: i32::from(port),
                    target_port: Some(IntOrString::Int(i32::from(port))),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn deploy_workload(&self) -> Result<()> {
        let name = self.application.name();
        let namespace = self.ctx.namespace();
        let fail_fast = EventFailFast::since_latest_event(self.ctx.client.clone(), namespace, name).await?;
        let replicas = validate_replicas(self.image_app.replicas(), name)?;
        let pp = PatchParams::apply(FIELD_MANAGER).force();

        let deployments: Api<Deployment> = Api::namespaced(self.ctx.client.clone(), namespace);
        deployments
            .patch(name, &pp, &Patch::Apply(&self.deployment()))
            .await?;
        info!("Applied deployment {}/{} with image {}", namespace, name, self.image);

        if let Some(port) = self.image_app.port() {
            let services: Api<Service> = Api::namespaced(self.ctx.client.clone(), namespace);
            services.patch(name, &pp, &Patch::Apply(&self.service(port))).await?;
            info!("Applied service {}/{}", namespace, name);
        }

        let pods: Api<Pod> = Api::namespaced(self.ctx.client.clone(), namespace);
        wait_for_ready_pods(&pods, &self.selector(), replicas, name, self.pod_wait(Some(&fail_fast), false)).await
    }

    async fn scale_workload(&self, replicas: i32, wait: bool) -> Result<()> {
        let name = self.application.name();
        let count = validate_replicas(replicas, name)?;
        let deployments: Api<Deployment> = Api::namespaced(self.ctx.client.clone(), self.ctx.namespace());
        let patch = json!({"spec": {"replicas": replicas}});
        deployments
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!("Scaled {} to {} replicas", name, replicas);

        if wait {
            let pods: Api<Pod> = Api::namespaced(self.ctx.client.clone(), self.ctx.namespace());
            wait_for_ready_pods(&pods, &self.selector(), count, name, self.pod_wait(None, false)).await?;
        }
        Ok(())
    }

    async fn delete_workload(&self) -> Result<()> {
        let name = self.application.name();
        let namespace = self.ctx.namespace();

        let services: Api<Service> = Api::namespaced(self.ctx.client.clone(), namespace);
        delete_if_exists(&services, name, &DeleteParams::default()).await?;
        let deployments: Api<Deployment> = Api::namespaced(self.ctx.client.clone(), namespace);
        if delete_if_exists(&deployments, name, &DeleteParams::foreground()).await? {
            info!("Deleted deployment {}/{}", namespace, name);
        }

        let pods: Api<Pod> = Api::namespaced(self.ctx.client.clone(), namespace);
        wait_for_ready_pods(&pods, &self.selector(), 0, name, self.pod_wait(None, true)).await
    }
}

#[async_trait]
impl Provisioner for ImageProvisioner {
    fn application(&self) -> Arc<dyn Application> {
        self.application.clone()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn configure(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Configure)?;
        if let Some(image) = self.ctx.config.operator_overrides(self.application.name()).image {
            info!("Using image override {} for {}", image, self.application.name());
            self.image = image;
        }
        let result = Ok(());
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
        let result = self.deploy_workload().await;
        self.lifecycle.finish(Operation::Deploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn scale(&mut self, replicas: i32, wait: bool) -> Result<()> {
        self.lifecycle.check(Operation::Scale)?;
        let result = self.scale_workload(replicas, wait).await;
        self.lifecycle.finish(Operation::Scale, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn undeploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Undeploy)?;
        let result = self.delete_workload().await;
        self.lifecycle.finish(Operation::Undeploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn post_undeploy(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::PostUndeploy)?;
        let result = release_prerequisites(&self.ctx, self.application.as_ref()).await;
        self.lifecycle.finish(Operation::PostUndeploy, &result);
        result
    }

    #[instrument(skip(self), fields(application = %self.application.name()))]
    async fn dismiss(&mut self) -> Result<()> {
        self.lifecycle.check(Operation::Dismiss)?;
        let result = Ok(());
        self.lifecycle.finish(Operation::Dismiss, &result);
        result
    }

    async fn pods(&self) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.ctx.client.clone(), self.ctx.namespace());
        list_pods(&pods, &self.selector()).await
    }

    fn url(&self) -> Result<Url> {
        service_url(self.application.as_ref(), self.ctx.namespace())
    }
}
