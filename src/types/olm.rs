// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Operator Lifecycle Manager resources, limited to the fields the engine reads or writes.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::olm::{CATALOG_READY_STATE, CSV_PHASE_FAILED, CSV_PHASE_SUCCEEDED};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, schemars::JsonSchema)]
pub enum InstallPlanApproval {
    #[default]
    Automatic,
    Manual,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "Subscription")]
#[kube(namespaced)]
#[kube(status = "SubscriptionStatus")]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Operator package name
    pub name: String,
    pub source: String,
    pub source_namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<InstallPlanApproval>,
    #[serde(rename = "startingCSV", skip_serializing_if = "Option::is_none")]
    pub starting_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<SubscriptionConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct SubscriptionConfig {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub env: Vec<EnvEntry>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, schemars::JsonSchema)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

impl SubscriptionConfig {
    pub fn from_env(env: &BTreeMap<String, String>) -> Option<Self> {
        if env.is_empty() {
            return None;
        }
        Some(SubscriptionConfig {
            env: env
                .iter()
                .map(|(name, value)| EnvEntry {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    #[serde(rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    #[serde(rename = "installedCSV", skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_plan_ref: Option<ObjectRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
pub struct ObjectRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Subscription {
    pub fn current_csv(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.current_csv.as_deref())
    }

    /// The CSV to clean up on unsubscribe, preferring the installed one
    pub fn owned_csv(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.installed_csv.as_deref().or(s.current_csv.as_deref()))
    }

    pub fn install_plan(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.install_plan_ref.as_ref())
            .map(|r| r.name.as_str())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "CatalogSource")]
#[kube(namespaced)]
#[kube(status = "CatalogSourceStatus")]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<ConnectionState>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub last_observed_state: String,
}

impl CatalogSource {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.connection_state.as_ref())
            .is_some_and(|c| c.last_observed_state == CATALOG_READY_STATE)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "ClusterServiceVersion")]
#[kube(namespaced)]
#[kube(status = "ClusterServiceVersionStatus")]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallStrategy>,
    #[serde(rename = "customresourcedefinitions", skip_serializing_if = "Option::is_none")]
    pub custom_resource_definitions: Option<CrdDescriptions>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct InstallStrategy {
    #[serde(default)]
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<InstallStrategySpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct InstallStrategySpec {
    #[serde(default)]
    pub deployments: Vec<StrategyDeployment>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
pub struct StrategyDeployment {
    pub name: String,
    #[serde(default)]
    pub spec: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct CrdDescriptions {
    #[serde(default)]
    pub owned: Vec<CrdDescription>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
pub struct CrdDescription {
    /// Full CRD name, `<plural>.<group>`
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct ClusterServiceVersionStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterServiceVersion {
    pub fn phase(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.phase.as_deref())
    }

    pub fn has_succeeded(&self) -> bool {
        self.phase() == Some(CSV_PHASE_SUCCEEDED)
    }

    pub fn has_failed(&self) -> bool {
        self.phase() == Some(CSV_PHASE_FAILED)
    }

    /// Human readable failure explanation from the status
    pub fn failure_reason(&self) -> String {
        let status = self.status.clone().unwrap_or_default();
        match (status.reason, status.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (Some(reason), None) => reason,
            (None, Some(message)) => message,
            (None, None) => "CSV phase Failed".to_string(),
        }
    }

    /// Label selectors of the operator deployments this CSV installs
    pub fn operator_pod_selectors(&self) -> Vec<String> {
        self.spec
            .install
            .as_ref()
            .and_then(|i| i.spec.as_ref())
            .map(|s| {
                s.deployments
                    .iter()
                    .filter_map(|d| d.spec.pointer("/selector/matchLabels"))
                    .filter_map(|labels| labels.as_object())
                    .map(|labels| {
                        labels
                            .iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| format!("{}={}", k, v)))
                            .collect::<Vec<_>>()
                            .join(",")
                    })
                    .filter(|selector| !selector.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of the CRDs this CSV owns
    pub fn owned_crds(&self) -> Vec<String> {
        self.spec
            .custom_resource_definitions
            .as_ref()
            .map(|c| c.owned.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1alpha1", kind = "InstallPlan")]
#[kube(namespaced)]
#[kube(status = "InstallPlanStatus")]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    #[serde(default)]
    pub approval: InstallPlanApproval,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
pub struct InstallPlanStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "operators.coreos.com", version = "v1", kind = "OperatorGroup")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_namespaces: Option<Vec<String>>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[kube(group = "packages.operators.coreos.com", version = "v1", kind = "PackageManifest")]
#[kube(namespaced)]
#[kube(status = "PackageManifestStatus")]
pub struct PackageManifestSpec {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestStatus {
    #[serde(default)]
    pub catalog_source: String,
    #[serde(default)]
    pub catalog_source_namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub channels: Vec<PackageChannel>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
pub struct PackageChannel {
    pub name: String,
    #[serde(rename = "currentCSV", skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
}

impl PackageManifest {
    /// The default channel, or the only channel when no default is declared
    pub fn default_channel(&self) -> Option<&str> {
        let status = self.status.as_ref()?;
        status.default_channel.as_deref().or_else(|| match status.channels.as_slice() {
            [only] => Some(only.name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use serde_json::json;

    fn make_csv(phase: Option<&str>, deployments: Vec<StrategyDeployment>) -> ClusterServiceVersion {
        ClusterServiceVersion {
            metadata: ObjectMeta {
                name: Some("example-operator.v1.0.0".to_string()),
                ..Default::default()
            },
            spec: ClusterServiceVersionSpec {
                install: Some(InstallStrategy {
                    strategy: "deployment".to_string(),
                    spec: Some(InstallStrategySpec { deployments }),
                }),
                ..Default::default()
            },
            status: Some(ClusterServiceVersionStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_csv_phase() {
        assert!(make_csv(Some("Succeeded"), vec![]).has_succeeded());
        assert!(make_csv(Some("Failed"), vec![]).has_failed());
        assert!(!make_csv(Some("Installing"), vec![]).has_succeeded());
        assert!(!make_csv(None, vec![]).has_failed());
    }

    #[test]
    fn test_csv_operator_pod_selectors() {
        let csv = make_csv(
            Some("Succeeded"),
            vec![
                StrategyDeployment {
                    name: "example-controller".to_string(),
                    spec: json!({"selector": {"matchLabels": {"name": "example-controller"}}}),
                },
                StrategyDeployment {
                    name: "no-selector".to_string(),
                    spec: json!({}),
                },
            ],
        );

        assert_eq!(csv.operator_pod_selectors(), vec!["name=example-controller".to_string()]);
    }

    #[test]
    fn test_csv_failure_reason() {
        let mut csv = make_csv(Some("Failed"), vec![]);
        assert_eq!(csv.failure_reason(), "CSV phase Failed");

        csv.status.as_mut().unwrap().reason = Some("InstallCheckFailed".to_string());
        csv.status.as_mut().unwrap().message = Some("deployment not available".to_string());
        assert_eq!(csv.failure_reason(), "InstallCheckFailed: deployment not available");
    }

    #[test]
    fn test_subscription_status_field_names() {
        let status: SubscriptionStatus = serde_json::from_value(json!({
            "currentCSV": "example-operator.v1.0.1",
            "installedCSV": "example-operator.v1.0.0",
            "installPlanRef": {"name": "install-abcde", "namespace": "it"}
        }))
        .unwrap();

        let sub = Subscription {
            metadata: ObjectMeta::default(),
            spec: SubscriptionSpec {
                name: "example-operator".to_string(),
                source: "redhat-operators".to_string(),
                source_namespace: "openshift-marketplace".to_string(),
                channel: None,
                install_plan_approval: None,
                starting_csv: None,
                config: None,
            },
            status: Some(status),
        };

        assert_eq!(sub.current_csv(), Some("example-operator.v1.0.1"));
        assert_eq!(sub.owned_csv(), Some("example-operator.v1.0.0"));
        assert_eq!(sub.install_plan(), Some("install-abcde"));
    }

    #[test]
    fn test_package_manifest_default_channel_fallback() {
        let mut pm = PackageManifest::new("example-operator", PackageManifestSpec {});
        pm.status = Some(PackageManifestStatus {
            channels: vec![PackageChannel {
                name: "alpha".to_string(),
                current_csv: None,
            }],
            ..Default::default()
        });
        assert_eq!(pm.default_channel(), Some("alpha"));

        pm.status.as_mut().unwrap().default_channel = Some("stable".to_string());
        assert_eq!(pm.default_channel(), Some("stable"));
    }

    #[test]
    fn test_subscription_config_from_env() {
        assert_eq!(SubscriptionConfig::from_env(&BTreeMap::new()), None);

        let env = BTreeMap::from([("RELATED_IMAGE".to_string(), "quay.io/x:1".to_string())]);
        let config = SubscriptionConfig::from_env(&env).unwrap();
        assert_eq!(config.env[0].name, "RELATED_IMAGE");
    }
}
