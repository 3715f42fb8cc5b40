// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod readiness observation

use crate::error::Result;
use crate::waiter::{FailFast, WaitOutcome, Waiter};
use k8s_openapi::api::core::v1::Pod;
use kube::{api::ListParams, Api};
use std::time::Duration;

/// Pods matching a selector, split by readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PodCounts {
    pub total: usize,
    pub ready: usize,
}

impl std::fmt::Display for PodCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} pods ready", self.ready, self.total)
    }
}

/// A pod counts as ready when its Ready condition is True and it is not terminating
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
}

pub async fn list_pods(pods: &Api<Pod>, selector: &str) -> Result<Vec<Pod>> {
    Ok(pods.list(&ListParams::default().labels(selector)).await?.items)
}

pub async fn count_pods(pods: &Api<Pod>, selector: &str) -> Result<PodCounts> {
    let items = list_pods(pods, selector).await?;
    Ok(PodCounts {
        total: items.len(),
        ready: items.iter().filter(|p| is_pod_ready(p)).count(),
    })
}

/// Parameters shared by the pod waits of a provisioner
#[derive(Clone, Copy)]
pub struct PodWait<'a> {
    pub timeout: Duration,
    pub interval: Duration,
    pub fail_fast: Option<&'a dyn FailFast>,
}

/// Wait until exactly `replicas` pods match `selector` and all of them are ready.
///
/// Zero is waited on like any other count: every matching pod must be gone.
pub async fn wait_for_ready_pods(
    pods: &Api<Pod>,
    selector: &str,
    replicas: usize,
    resource: &str,
    params: PodWait<'_>,
) -> Result<()> {
    let namespace = namespace_of(pods);
    let waited_for = format!("{} ready pods matching '{}'", replicas, selector);

    let outcome = Waiter::new(waited_for.clone())
        .timeout(params.timeout)
        .interval(params.interval)
        .maybe_fail_fast(params.fail_fast)
        .wait(|| {
            let pods = pods.clone();
            let selector = selector.to_string();
            async move {
                let counts = count_pods(&pods, &selector).await?;
                Ok(counts.total == replicas && counts.ready == replicas)
            }
        })
        .await;

    match outcome {
        WaitOutcome::Timeout { last_observed } => {
            // Attach what the cluster looked like when we gave up
            let observed = match count_pods(pods, selector).await {
                Ok(counts) => Some(counts.to_string()),
                Err(_) => last_observed,
            };
            WaitOutcome::Timeout {
                last_observed: observed,
            }
            .into_result(resource, &namespace, &waited_for)
        }
        other => other.into_result(resource, &namespace, &waited_for),
    }
}

/// Namespace segment of the API's resource path
fn namespace_of(pods: &Api<Pod>) -> String {
    let mut segments = pods.resource_url().split('/');
    segments
        .find(|segment| *segment == "namespaces")
        .and_then(|_| segments.next())
        .unwrap_or_default()
        .to_string()
}
