// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Application descriptors: what the caller wants deployed.
//!
//! Descriptors are immutable and shared with provisioners behind an `Arc`. The capability
//! traits ([`OperatorApplication`], [`ImageApplication`]) decide which provisioner handles them.

use crate::constants::labels;
use crate::types::olm::InstallPlanApproval;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{DynamicObject, ObjectMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Capability kinds provisioner factories claim
pub mod kinds {
    pub const OPERATOR: &str = "operator";
    pub const IMAGE: &str = "image";
}

/// Service through which a deployed application is reachable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub service: String,
    pub port: u16,
}

pub trait Application: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Capability kind used for provisioner dispatch
    fn kind(&self) -> &str;

    fn secrets(&self) -> Vec<Secret> {
        Vec::new()
    }

    fn config_maps(&self) -> Vec<ConfigMap> {
        Vec::new()
    }

    fn endpoint(&self) -> Option<Endpoint> {
        None
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn OperatorApplication>> {
        None
    }

    fn into_image(self: Arc<Self>) -> Option<Arc<dyn ImageApplication>> {
        None
    }
}

/// An application installed through an OLM operator and driven by custom resources
pub trait OperatorApplication: Application {
    /// Operator package in the catalog
    fn package(&self) -> &str;

    /// Product name used to look up configuration overrides
    fn product(&self) -> &str {
        self.package()
    }

    /// Custom resources to apply once the operator is ready; the first one is scaled
    fn custom_resources(&self) -> Vec<DynamicObject>;

    fn replicas(&self) -> i32;

    /// Label selector of the pods the operator runs for this application
    fn pod_selector(&self) -> String {
        format!("app={}", self.name())
    }

    /// JSON pointer to the replica count in the first custom resource, `None` if not scalable
    fn replicas_pointer(&self) -> Option<String> {
        Some("/spec/replicas".to_string())
    }

    fn install_plan_approval(&self) -> InstallPlanApproval {
        InstallPlanApproval::Automatic
    }

    /// Environment passed to the operator deployment through the subscription
    fn operator_env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// An application deployed directly from a container image
pub trait ImageApplication: Application {
    fn image(&self) -> &str;

    fn replicas(&self) -> i32;

    fn port(&self) -> Option<u16> {
        None
    }

    fn env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Any descriptor the smoke runner can read from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ApplicationDescriptor {
    Operator(OperatorDescriptor),
    Image(ImageDescriptor),
}

impl ApplicationDescriptor {
    pub fn into_application(self) -> Arc<dyn Application> {
        match self {
            ApplicationDescriptor::Operator(d) => Arc::new(d),
            ApplicationDescriptor::Image(d) => Arc::new(d),
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_replicas_pointer() -> Option<String> {
    Some("/spec/replicas".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorDescriptor {
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub custom_resources: Vec<DynamicObject>,
    #[serde(default)]
    pub pod_selector: Option<String>,
    #[serde(default = "default_replicas_pointer")]
    pub replicas_pointer: Option<String>,
    #[serde(default)]
    pub install_plan_approval: InstallPlanApproval,
    #[serde(default)]
    pub operator_env: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

impl Application for OperatorDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        kinds::OPERATOR
    }

    fn secrets(&self) -> Vec<Secret> {
        build_secrets(&self.name, &self.secrets)
    }

    fn config_maps(&self) -> Vec<ConfigMap> {
        build_config_maps(&self.name, &self.config_maps)
    }

    fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.clone()
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn OperatorApplication>> {
        Some(self)
    }
}

impl OperatorApplication for OperatorDescriptor {
    fn package(&self) -> &str {
        &self.package
    }

    fn product(&self) -> &str {
        self.product.as_deref().unwrap_or(&self.package)
    }

    fn custom_resources(&self) -> Vec<DynamicObject> {
        self.custom_resources.clone()
    }

    fn replicas(&self) -> i32 {
        self.replicas
    }

    fn pod_selector(&self) -> String {
        self.pod_selector
            .clone()
            .unwrap_or_else(|| format!("app={}", self.name))
    }

    fn replicas_pointer(&self) -> Option<String> {
        self.replicas_pointer.clone()
    }

    fn install_plan_approval(&self) -> InstallPlanApproval {
        self.install_plan_approval
    }

    fn operator_env(&self) -> BTreeMap<String, String> {
        self.operator_env.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptor {
    pub name: String,
    pub image: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
}

impl Application for ImageDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        kinds::IMAGE
    }

    fn secrets(&self) -> Vec<Secret> {
        build_secrets(&self.name, &self.secrets)
    }

    fn config_maps(&self) -> Vec<ConfigMap> {
        build_config_maps(&self.name, &self.config_maps)
    }

    /// Image applications exposing a port get a service named after them
    fn endpoint(&self) -> Option<Endpoint> {
        self.port.map(|port| Endpoint {
            service: self.name.clone(),
            port,
        })
    }

    fn into_image(self: Arc<Self>) -> Option<Arc<dyn ImageApplication>> {
        Some(self)
    }
}

impl ImageApplication for ImageDescriptor {
    fn image(&self) -> &str {
        &self.image
    }

    fn replicas(&self) -> i32 {
        self.replicas
    }

    fn port(&self) -> Option<u16> {
        self.port
    }

    fn env(&self) -> BTreeMap<String, String> {
        self.env.clone()
    }

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }
}

/// Labels stamped on every object created for `application`
pub fn application_labels(application: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::MANAGED_BY.to_string(), labels::MANAGED_BY_VALUE.to_string()),
        (labels::APPLICATION.to_string(), application.to_string()),
    ])
}

fn object_meta(application: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(application_labels(application)),
        ..Default::default()
    }
}

fn build_secrets(application: &str, secrets: &BTreeMap<String, BTreeMap<String, String>>) -> Vec<Secret> {
    secrets
        .iter()
        .map(|(name, data)| Secret {
            metadata: object_meta(application, name),
            string_data: Some(data.clone()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        })
        .collect()
}

fn build_config_maps(application: &str, maps: &BTreeMap<String, BTreeMap<String, String>>) -> Vec<ConfigMap> {
    maps.iter()
        .map(|(name, data)| ConfigMap {
            metadata: object_meta(application, name),
            data: Some(data.clone()),
            ..Default::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPERATOR_YAML: &str = r#"
type: operator
name: example
package: example-operator
replicas: 2
customResources:
  - apiVersion: example.com/v1
    kind: ExampleApp
    metadata:
      name: example
    spec:
      size: small
secrets:
  example-credentials:
    password: s3cr3t
"#;

    #[test]
    fn test_operator_descriptor_from_yaml() {
        let descriptor: ApplicationDescriptor = serde_yaml::from_str(OPERATOR_YAML).unwrap();
        let app = descriptor.into_application();
        assert_eq!(app.kind(), kinds::OPERATOR);

        let secrets = app.secrets();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].metadata.name.as_deref(), Some("example-credentials"));
        assert_eq!(
            secrets[0].metadata.labels.as_ref().unwrap()[labels::APPLICATION],
            "example"
        );

        let operator = app.clone().into_operator().unwrap();
        assert!(app.into_image().is_none());
        assert_eq!(operator.package(), "example-operator");
        assert_eq!(operator.product(), "example-operator");
        assert_eq!(operator.replicas(), 2);
        assert_eq!(operator.pod_selector(), "app=example");
        assert_eq!(operator.replicas_pointer().as_deref(), Some("/spec/replicas"));
        assert_eq!(operator.install_plan_approval(), InstallPlanApproval::Automatic);

        let crs = operator.custom_resources();
        assert_eq!(crs.len(), 1);
        assert_eq!(crs[0].types.as_ref().unwrap().kind, "ExampleApp");
        assert_eq!(crs[0].data["spec"]["size"], "small");
    }

    #[test]
    fn test_image_descriptor_endpoint() {
        let descriptor: ApplicationDescriptor = serde_yaml::from_str(
            "type: image\nname: web\nimage: registry.example.com/web:1\nport: 8080\n",
        )
        .unwrap();
        let app = descriptor.into_application();

        assert_eq!(app.kind(), kinds::IMAGE);
        assert_eq!(
            app.endpoint(),
            Some(Endpoint {
                service: "web".to_string(),
                port: 8080
            })
        );
        let image = app.into_image().unwrap();
        assert_eq!(image.replicas(), 1);
        assert_eq!(image.image(), "registry.example.com/web:1");
    }
}
