// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! OLM subscription state machine: subscribe, approve, await the CSV, unsubscribe.

use crate::config::Config;
use crate::constants::{labels, olm, FIELD_MANAGER};
use crate::error::{ProvisionError, Result};
use crate::kubernetes::{delete_if_exists, wait_for_ready_pods, PodWait};
use crate::olm::CatalogCoordinates;
use crate::types::olm::{
    ClusterServiceVersion, InstallPlan, InstallPlanApproval, OperatorGroup, OperatorGroupSpec, Subscription,
    SubscriptionConfig, SubscriptionSpec,
};
use crate::waiter::{FailFast, Waiter};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    Api, Client,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    NotSubscribed,
    Subscribing,
    AwaitingCsv,
    Ready,
    Unsubscribing,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::NotSubscribed => "not subscribed",
            SubscriptionState::Subscribing => "subscribing",
            SubscriptionState::AwaitingCsv => "awaiting CSV",
            SubscriptionState::Ready => "ready",
            SubscriptionState::Unsubscribing => "unsubscribing",
        };
        f.write_str(s)
    }
}

/// Manages the single Subscription of one operator package in the provisioning namespace
pub struct SubscriptionManager {
    client: Client,
    config: Arc<Config>,
    namespace: String,
    coordinates: CatalogCoordinates,
    state: SubscriptionState,
    csv: Option<String>,
}

impl SubscriptionManager {
    pub fn new(client: Client, config: Arc<Config>, coordinates: CatalogCoordinates) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            config,
            coordinates,
            state: SubscriptionState::NotSubscribed,
            csv: None,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// The succeeded CSV, once subscribed
    pub fn csv(&self) -> Option<&str> {
        self.csv.as_deref()
    }

    pub fn coordinates(&self) -> &CatalogCoordinates {
        &self.coordinates
    }

    /// Subscription name, which is the package name
    pub fn name(&self) -> &str {
        &self.coordinates.package
    }

    /// Subscribe to the package and wait for its CSV to succeed. Returns the CSV name.
    ///
    /// Applying the subscription is a server-side apply by name, so subscribing again
    /// converges on the same single Subscription.
    #[instrument(skip(self, env, fail_fast), fields(package = %self.coordinates.package))]
    pub async fn subscribe(
        &mut self,
        approval: InstallPlanApproval,
        env: &BTreeMap<String, String>,
        fail_fast: Option<&dyn FailFast>,
    ) -> Result<String> {
        self.state = SubscriptionState::Subscribing;
        self.ensure_operator_group().await?;
        self.apply_subscription(approval, env).await?;

        if approval == InstallPlanApproval::Manual {
            self.approve_install_plan(fail_fast).await?;
        }

        self.state = SubscriptionState::AwaitingCsv;
        let csv = self.await_csv(fail_fast).await?;

        info!("Subscription {} is ready with CSV {}", self.name(), csv);
        self.csv = Some(csv.clone());
        self.state = SubscriptionState::Ready;
        Ok(csv)
    }

    /// Delete the Subscription and its CSV, then wait for the operator pods to go away.
    ///
    /// A no-op when nothing is subscribed.
    #[instrument(skip(self), fields(package = %self.coordinates.package))]
    pub async fn unsubscribe(&mut self) -> Result<()> {
        let subscriptions: Api<Subscription> = Api::namespaced(self.client.clone(), &self.namespace);
        let existing = subscriptions.get_opt(self.name()).await?;

        let csv_name = existing
            .as_ref()
            .and_then(|s| s.owned_csv().map(str::to_string))
            .or_else(|| self.csv.clone());
        if existing.is_none() && csv_name.is_none() {
            debug!("Nothing subscribed for {}", self.name());
            self.state = SubscriptionState::NotSubscribed;
            return Ok(());
        }

        self.state = SubscriptionState::Unsubscribing;
        info!("Unsubscribing from {}", self.name());

        let csvs: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), &self.namespace);
        let csv = match &csv_name {
            Some(name) => csvs.get_opt(name).await?,
            None => None,
        };

        delete_if_exists(&subscriptions, self.name(), &DeleteParams::default()).await?;
        if let Some(name) = &csv_name {
            delete_if_exists(&csvs, name, &DeleteParams::default()).await?;
        }

        if let Some(csv) = csv {
            let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
            let params = PodWait {
                timeout: self.config.deletion_timeout,
                interval: self.config.poll_interval,
                fail_fast: None,
            };
            for selector in csv.operator_pod_selectors() {
                wait_for_ready_pods(&pods, &selector, 0, self.name(), params).await?;
            }
        }

        self.csv = None;
        self.state = SubscriptionState::NotSubscribed;
        info!("Unsubscribed from {}", self.name());
        Ok(())
    }

    /// Names of the CRDs owned by the subscribed CSV
    pub async fn owned_crds(&self) -> Result<Vec<String>> {
        let Some(name) = &self.csv else {
            return Ok(Vec::new());
        };
        let csvs: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), &self.namespace);
        Ok(csvs.get(name).await?.owned_crds())
    }

    /// OLM refuses to install into a namespace without exactly one OperatorGroup
    async fn ensure_operator_group(&self) -> Result<()> {
        let groups: Api<OperatorGroup> = Api::namespaced(self.client.clone(), &self.namespace);
        if !groups.list(&ListParams::default()).await?.items.is_empty() {
            return Ok(());
        }

        let group = OperatorGroup {
            metadata: ObjectMeta {
                name: Some(olm::OPERATOR_GROUP_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            spec: OperatorGroupSpec {
                target_namespaces: Some(vec![self.namespace.clone()]),
            },
        };
        match groups.create(&PostParams::default(), &group).await {
            Ok(_) => info!("Created operator group {}", olm::OPERATOR_GROUP_NAME),
            Err(kube::Error::Api(err)) if err.code == 409 => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn apply_subscription(&self, approval: InstallPlanApproval, env: &BTreeMap<String, String>) -> Result<()> {
        let subscriptions: Api<Subscription> = Api::namespaced(self.client.clone(), &self.namespace);
        let subscription = Subscription {
            metadata: ObjectMeta {
                name: Some(self.name().to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(managed_labels()),
                ..Default::default()
            },
            spec: SubscriptionSpec {
                name: self.coordinates.package.clone(),
                source: self.coordinates.catalog_source.clone(),
                source_namespace: self.coordinates.catalog_source_namespace.clone(),
                channel: Some(self.coordinates.channel.clone()),
                install_plan_approval: Some(approval),
                starting_csv: None,
                config: SubscriptionConfig::from_env(env),
            },
            status: None,
        };

        let pp = PatchParams::apply(FIELD_MANAGER).force();
        subscriptions
            .patch(self.name(), &pp, &Patch::Apply(&subscription))
            .await?;
        debug!(
            "Applied subscription {} on channel {} from {}",
            self.name(),
            self.coordinates.channel,
            self.coordinates.catalog_source
        );
        Ok(())
    }

    async fn approve_install_plan(&self, fail_fast: Option<&dyn FailFast>) -> Result<()> {
        let subscriptions: Api<Subscription> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = self.name();
        let waited_for = format!("install plan of subscription {}", name);

        Waiter::new(waited_for.clone())
            .timeout(self.config.subscription_timeout)
            .interval(self.config.poll_interval)
            .maybe_fail_fast(fail_fast)
            .wait(|| {
                let subscriptions = subscriptions.clone();
                async move { Ok(subscriptions.get(name).await?.install_plan().is_some()) }
            })
            .await
            .into_result(name, &self.namespace, &waited_for)?;

        let Some(plan) = subscriptions.get(name).await?.install_plan().map(str::to_string) else {
            return Ok(());
        };
        let plans: Api<InstallPlan> = Api::namespaced(self.client.clone(), &self.namespace);
        let patch = json!({"spec": {"approved": true}});
        plans.patch(&plan, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        info!("Approved install plan {} for {}", plan, name);
        Ok(())
    }

    /// Wait for `status.currentCSV` to reach phase Succeeded; phase Failed aborts the wait
    async fn await_csv(&self, fail_fast: Option<&dyn FailFast>) -> Result<String> {
        let subscriptions: Api<Subscription> = Api::namespaced(self.client.clone(), &self.namespace);
        let csvs: Api<ClusterServiceVersion> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = self.name();
        let namespace = self.namespace.as_str();
        let waited_for = format!("CSV of subscription {} to succeed", name);

        Waiter::new(waited_for.clone())
            .timeout(self.config.subscription_timeout)
            .interval(self.config.poll_interval)
            .maybe_fail_fast(fail_fast)
            .wait(|| {
                let subscriptions = subscriptions.clone();
                let csvs = csvs.clone();
                async move {
                    let Some(current) = subscriptions.get(name).await?.current_csv().map(str::to_string) else {
                        return Ok(false);
                    };
                    let Some(csv) = csvs.get_opt(&current).await? else {
                        return Ok(false);
                    };
                    if csv.has_failed() {
                        return Err(ProvisionError::SubscriptionFailed {
                            subscription: name.to_string(),
                            namespace: namespace.to_string(),
                            csv: current,
                            reason: csv.failure_reason(),
                        });
                    }
                    if !csv.has_succeeded() {
                        debug!("CSV {} is in phase {:?}", current, csv.phase());
                    }
                    Ok(csv.has_succeeded())
                }
            })
            .await
            .into_result(name, namespace, &waited_for)?;

        subscriptions
            .get(name)
            .await?
            .current_csv()
            .map(str::to_string)
            .ok_or_else(|| {
                warn!("Subscription {} lost its current CSV", name);
                ProvisionError::SubscriptionFailed {
                    subscription: name.to_string(),
                    namespace: namespace.to_string(),
                    csv: String::new(),
                    reason: "no CSV reported".to_string(),
                }
            })
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(
        labels::MANAGED_BY.to_string(),
        labels::MANAGED_BY_VALUE.to_string(),
    )])
}
