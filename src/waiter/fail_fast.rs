// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Early abort of waits based on cluster warning events.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use k8s_openapi::api::core::v1::Event;
use kube::{api::ListParams, Api, Client, ResourceExt};
use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::error::Result;

/// A check consulted on every waiter tick; `Some(description)` aborts the wait.
#[async_trait]
pub trait FailFast: Send + Sync {
    async fn failure(&self) -> Option<String>;

    async fn has_failed(&self) -> bool {
        self.failure().await.is_some()
    }
}

/// Detects non-`Normal` events for a resource (or its `<name>-*` derivatives) at or after a baseline.
///
/// Event timestamps only have second resolution, so events in the baseline's own second
/// count too; events that already existed when the baseline was taken are excluded by uid.
///
/// Every call lists the namespace events again. That costs one API call per poll tick,
/// which is accepted so that an error is never missed because of a stale cache.
#[derive(Clone)]
pub struct EventFailFast {
    events: Api<Event>,
    baseline: DateTime<Utc>,
    known: HashSet<String>,
    resource_name: String,
}

impl EventFailFast {
    pub fn new(client: Client, namespace: &str, baseline: DateTime<Utc>, resource_name: &str) -> Self {
        Self {
            events: Api::namespaced(client, namespace),
            baseline,
            known: HashSet::new(),
            resource_name: resource_name.to_string(),
        }
    }

    /// Use the newest event currently in the namespace as the baseline, or the current second if there is none
    #[instrument(skip(client))]
    pub async fn since_latest_event(client: Client, namespace: &str, resource_name: &str) -> Result<Self> {
        let events: Api<Event> = Api::namespaced(client.clone(), namespace);
        let existing = events.list(&ListParams::default()).await?.items;
        let baseline = existing
            .iter()
            .filter_map(event_timestamp)
            .max()
            .unwrap_or_else(|| Utc::now().trunc_subsecs(0));

        debug!("Fail-fast baseline for {} is {}", resource_name, baseline);
        let mut check = Self::new(client, namespace, baseline, resource_name);
        check.known = existing.iter().filter_map(|e| e.uid()).collect();
        Ok(check)
    }

    pub fn baseline(&self) -> DateTime<Utc> {
        self.baseline
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }
}

#[async_trait]
impl FailFast for EventFailFast {
    async fn failure(&self) -> Option<String> {
        let events = match self.events.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                debug!("Unable to list events for fail-fast check of {}: {}", self.resource_name, e);
                return None;
            }
        };

        events
            .iter()
            .filter(|e| e.uid().map_or(true, |uid| !self.known.contains(&uid)))
            .find(|e| is_failure_event(e, &self.resource_name, self.baseline))
            .map(describe_event)
    }
}

/// Most precise timestamp an event carries
pub fn event_timestamp(event: &Event) -> Option<DateTime<Utc>> {
    event
        .event_time
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.last_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.first_timestamp.as_ref().map(|t| t.0))
        .or_else(|| event.metadata.creation_timestamp.as_ref().map(|t| t.0))
}

pub fn is_failure_event(event: &Event, resource_name: &str, baseline: DateTime<Utc>) -> bool {
    let abnormal = event.type_.as_deref().is_some_and(|t| t != "Normal");
    let involved = event
        .involved_object
        .name
        .as_deref()
        .is_some_and(|n| n == resource_name || n.starts_with(&format!("{}-", resource_name)));
    let recent = event_timestamp(event).is_some_and(|ts| ts >= baseline);

    abnormal && involved && recent
}

fn describe_event(event: &Event) -> String {
    format!(
        "{} event {} on {}/{}: {}",
        event.type_.as_deref().unwrap_or("Unknown"),
        event.reason.as_deref().unwrap_or("<no reason>"),
        event.involved_object.kind.as_deref().unwrap_or("object"),
        event.involved_object.name.as_deref().unwrap_or_default(),
        event.message.as_deref().unwrap_or_default()
    )
}
