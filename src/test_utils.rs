// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! An in-memory Kubernetes API server for tests.
//!
//! [`FakeCluster`] stores objects as JSON, answers the REST verbs `kube::Api` issues
//! (get, list with label selectors, create, replace, merge and apply patches, delete)
//! and can play the part of OLM and of product operators via [`FakeCluster::reconcile`].

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use http::{header::CONTENT_TYPE, Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::Service;

pub const OWNER_LABEL: &str = "fake.intersmash.io/owner";
pub const EXAMPLE_CRD: &str = "exampleapps.example.com";

/// Collection paths as the API server exposes them
pub mod paths {
    pub fn core(namespace: &str, plural: &str) -> String {
        format!("/api/v1/namespaces/{}/{}", namespace, plural)
    }

    pub fn olm(namespace: &str, plural: &str) -> String {
        format!("/apis/operators.coreos.com/v1alpha1/namespaces/{}/{}", namespace, plural)
    }

    pub fn operator_groups(namespace: &str) -> String {
        format!("/apis/operators.coreos.com/v1/namespaces/{}/operatorgroups", namespace)
    }

    pub fn package_manifests(namespace: &str) -> String {
        format!("/apis/packages.operators.coreos.com/v1/namespaces/{}/packagemanifests", namespace)
    }

    pub fn deployments(namespace: &str) -> String {
        format!("/apis/apps/v1/namespaces/{}/deployments", namespace)
    }

    pub fn example_apps(namespace: &str) -> String {
        format!("/apis/example.com/v1/namespaces/{}/exampleapps", namespace)
    }

    pub fn crds() -> String {
        "/apis/apiextensions.k8s.io/v1/customresourcedefinitions".to_string()
    }

    pub fn namespaces() -> String {
        "/api/v1/namespaces".to_string()
    }
}

#[derive(Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<String, Value>>,
    counter: u64,
    last_event_at: Option<DateTime<Utc>>,
    /// Packages every newly created catalog source serves
    catalog_packages: Vec<String>,
    /// Packages whose CSV ends up in phase Failed
    failing_packages: BTreeSet<String>,
    requests: Vec<(String, String)>,
}

/// A stateful fake API server usable as the transport of a `kube::Client`.
#[derive(Clone)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let state = State {
            catalog_packages: vec!["example-operator".to_string()],
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Build a kube Client backed by this fake
    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    /// Store an object as-is in a collection, stamping metadata
    pub fn insert(&self, collection: &str, object: Value) {
        let mut state = self.state.lock().unwrap();
        let name = object["metadata"]["name"].as_str().unwrap().to_string();
        state.put(collection, &name, object);
    }

    pub fn get(&self, collection: &str, name: &str) -> Option<Value> {
        self.state.lock().unwrap().get(collection, name).cloned()
    }

    pub fn list(&self, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.list(collection).len()
    }

    /// Number of recorded requests with `method` whose path starts with `prefix`
    pub fn count_requests(&self, method: &str, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(m, p)| m == method && p.starts_with(prefix))
            .count()
    }

    /// Make CSVs for `package` end up in phase Failed
    pub fn fail_package(&self, package: &str) {
        self.state.lock().unwrap().failing_packages.insert(package.to_string());
    }

    /// Record an event, timestamped a second ahead so it is newer than any baseline taken before
    pub fn add_event(&self, namespace: &str, involved: &str, type_: &str, reason: &str) {
        let mut state = self.state.lock().unwrap();
        let step = ChronoDuration::seconds(1);
        let at = match state.last_event_at {
            Some(last) => (last + step).max(Utc::now() + step),
            None => Utc::now() + step,
        };
        state.last_event_at = Some(at);
        state.counter += 1;
        let name = format!("{}.{}", involved, state.counter);
        let event = json!({
            "apiVersion": "v1",
            "kind": "Event",
            "metadata": {"name": name},
            "involvedObject": {"kind": "Pod", "name": involved, "namespace": namespace},
            "type": type_,
            "reason": reason,
            "message": format!("{} for {}", reason, involved),
            "lastTimestamp": at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        state.put(&paths::core(namespace, "events"), &name, event);
    }

    /// Publish a package manifest in a catalog namespace
    pub fn add_package_manifest(&self, namespace: &str, catalog: &str, package: &str, channel: &str) {
        let mut state = self.state.lock().unwrap();
        state.put(
            &paths::package_manifests(namespace),
            package,
            package_manifest(namespace, catalog, package, channel),
        );
    }

    /// Run one pass of the fake OLM and operator controllers
    pub fn reconcile(&self) {
        let mut state = self.state.lock().unwrap();
        state.reconcile_catalog_sources();
        state.reconcile_subscriptions();
        state.reconcile_workloads();
        state.collect_orphan_pods();
    }

    /// Reconcile in the background every 500ms until the handle is aborted
    pub fn spawn_controllers(&self) -> JoinHandle<()> {
        let fake = self.clone();
        tokio::spawn(async move {
            loop {
                fake.reconcile();
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        })
    }

    fn handle(&self, method: &str, path: &str, query: &str, content_type: &str, body: &[u8]) -> (u16, Value) {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), path.to_string()));

        let Some(target) = parse_path(path) else {
            return not_found(path);
        };
        let body: Value = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_slice(body) {
                Ok(v) => v,
                Err(e) => return status(400, "BadRequest", &e.to_string()),
            }
        };

        match (method, target.name.as_deref()) {
            ("GET", Some(name)) => match state.get(&target.collection, name) {
                Some(obj) => (200, obj.clone()),
                None => not_found(name),
            },
            ("GET", None) => {
                let selector = url::form_urlencoded::parse(query.as_bytes())
                    .find(|(k, _)| k == "labelSelector")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                let items: Vec<Value> = state
                    .collections
                    .get(&target.collection)
                    .map(|c| c.values().filter(|o| matches_selector(o, &selector)).cloned().collect())
                    .unwrap_or_default();
                let version = state.counter.to_string();
                (
                    200,
                    json!({"apiVersion": "v1", "kind": "List", "metadata": {"resourceVersion": version}, "items": items}),
                )
            }
            ("POST", None) => {
                let Some(name) = body["metadata"]["name"].as_str().map(str::to_string) else {
                    return status(422, "Invalid", "metadata.name is required");
                };
                if state.get(&target.collection, &name).is_some() {
                    return status(409, "AlreadyExists", &format!("{} already exists", name));
                }
                let stored = state.put(&target.collection, &name, body);
                (201, stored)
            }
            ("PUT", Some(name)) => {
                let Some(existing) = state.get(&target.collection, name).cloned() else {
                    return not_found(name);
                };
                let mut replacement = body;
                if replacement.get("status").is_none() {
                    if let Some(status) = existing.get("status") {
                        replacement["status"] = status.clone();
                    }
                }
                (200, state.put(&target.collection, name, replacement))
            }
            ("PATCH", Some(name)) => {
                let existing = state.get(&target.collection, name).cloned();
                let patched = match (content_type, existing) {
                    (ct, existing) if ct.starts_with("application/apply-patch") => {
                        let mut obj = existing.unwrap_or(Value::Null);
                        merge(&mut obj, &body);
                        obj
                    }
                    (_, Some(mut obj)) => {
                        merge(&mut obj, &body);
                        obj
                    }
                    (_, None) => return not_found(name),
                };
                (200, state.put(&target.collection, name, patched))
            }
            ("DELETE", Some(name)) => match state.remove(&target.collection, name) {
                Some(obj) => (200, obj),
                None => not_found(name),
            },
            _ => status(405, "MethodNotAllowed", method),
        }
    }
}

impl State {
    fn get(&self, collection: &str, name: &str) -> Option<&Value> {
        self.collections.get(collection).and_then(|c| c.get(name))
    }

    fn put(&mut self, collection: &str, name: &str, mut object: Value) -> Value {
        self.counter += 1;
        let namespace = namespace_of(collection);
        let counter = self.counter;
        let meta = object
            .as_object_mut()
            .unwrap()
            .entry("metadata")
            .or_insert_with(|| json!({}));
        meta["name"] = json!(name);
        if let Some(ns) = namespace {
            meta["namespace"] = json!(ns);
        }
        if meta.get("uid").is_none() {
            meta["uid"] = json!(format!("uid-{}", counter));
        }
        if meta.get("creationTimestamp").is_none() {
            meta["creationTimestamp"] = json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        meta["resourceVersion"] = json!(counter.to_string());

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(name.to_string(), object.clone());
        object
    }

    fn remove(&mut self, collection: &str, name: &str) -> Option<Value> {
        self.collections.get_mut(collection).and_then(|c| c.remove(name))
    }

    fn collection_keys(&self, suffix: &str) -> Vec<String> {
        self.collections
            .keys()
            .filter(|k| k.ends_with(suffix))
            .cloned()
            .collect()
    }

    fn entries(&self, collection: &str) -> Vec<(String, Value)> {
        self.collections
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn reconcile_catalog_sources(&mut self) {
        for collection in self.collection_keys("/catalogsources") {
            let namespace = namespace_of(&collection).unwrap();
            for (name, mut source) in self.entries(&collection) {
                if source.get("status").is_some() {
                    continue;
                }
                source["status"] = json!({"connectionState": {"lastObservedState": "READY"}});
                self.put(&collection, &name, source);

                for package in self.catalog_packages.clone() {
                    self.put(
                        &paths::package_manifests(&namespace),
                        &package,
                        package_manifest(&namespace, &name, &package, "stable"),
                    );
                }
            }
        }
    }

    fn reconcile_subscriptions(&mut self) {
        for collection in self.collection_keys("/subscriptions") {
            let namespace = namespace_of(&collection).unwrap();
            for (name, mut subscription) in self.entries(&collection) {
                if subscription.pointer("/status/currentCSV").is_some() {
                    continue;
                }
                let package = subscription["spec"]["name"].as_str().unwrap().to_string();
                let csv = format!("{}.v1.0.0", package);

                if subscription["spec"]["installPlanApproval"] == "Manual" {
                    let plans = paths::olm(&namespace, "installplans");
                    let plan_name = format!("install-{}", package);
                    if self.get(&plans, &plan_name).is_none() {
                        let plan = json!({
                            "apiVersion": "operators.coreos.com/v1alpha1",
                            "kind": "InstallPlan",
                            "metadata": {"name": plan_name},
                            "spec": {"approval": "Manual", "approved": false, "clusterServiceVersionNames": [csv]},
                        });
                        self.put(&plans, &plan_name, plan);
                        subscription["status"] = json!({
                            "installPlanRef": {"name": plan_name, "namespace": namespace},
                            "state": "UpgradePending",
                        });
                        subscription = self.put(&collection, &name, subscription);
                    }
                    let approved = self
                        .get(&plans, &plan_name)
                        .is_some_and(|p| p["spec"]["approved"] == true);
                    if !approved {
                        continue;
                    }
                }

                self.install_csv(&namespace, &package, &csv);
                let mut status = subscription.get("status").cloned().unwrap_or_else(|| json!({}));
                status["currentCSV"] = json!(csv);
                status["installedCSV"] = json!(csv);
                status["state"] = json!("AtLatestKnown");
                subscription["status"] = status;
                self.put(&collection, &name, subscription);
            }
        }
    }

    fn install_csv(&mut self, namespace: &str, package: &str, csv: &str) {
        let csvs = paths::olm(namespace, "clusterserviceversions");
        if self.get(&csvs, csv).is_some() {
            return;
        }
        let controller = format!("{}-controller", package);
        let failed = self.failing_packages.contains(package);
        let status = if failed {
            json!({"phase": "Failed", "reason": "InstallCheckFailed", "message": "install timeout"})
        } else {
            json!({"phase": "Succeeded"})
        };
        let object = json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "ClusterServiceVersion",
            "metadata": {"name": csv},
            "spec": {
                "displayName": package,
                "version": "1.0.0",
                "install": {
                    "strategy": "deployment",
                    "spec": {"deployments": [{"name": controller, "spec": {"selector": {"matchLabels": {"name": controller}}}}]},
                },
                "customresourcedefinitions": {"owned": [{"name": EXAMPLE_CRD, "kind": "ExampleApp", "version": "v1"}]},
            },
            "status": status,
        });
        self.put(&csvs, csv, object);
        if failed {
            return;
        }

        if self.get(&paths::crds(), EXAMPLE_CRD).is_none() {
            let crd = json!({
                "apiVersion": "apiextensions.k8s.io/v1",
                "kind": "CustomResourceDefinition",
                "metadata": {"name": EXAMPLE_CRD},
                "spec": {
                    "group": "example.com",
                    "names": {"kind": "ExampleApp", "plural": "exampleapps", "singular": "exampleapp", "listKind": "ExampleAppList"},
                    "scope": "Namespaced",
                    "versions": [{"name": "v1", "served": true, "storage": true}],
                },
                "status": {"conditions": [{"type": "Established", "status": "True"}]},
            });
            self.put(&paths::crds(), EXAMPLE_CRD, crd);
        }

        let labels = json!({"name": controller, OWNER_LABEL: format!("csv.{}", csv)});
        self.put(
            &paths::core(namespace, "pods"),
            &format!("{}-0", controller),
            ready_pod(labels),
        );
    }

    fn reconcile_workloads(&mut self) {
        for collection in self.collection_keys("/exampleapps") {
            let namespace = namespace_of(&collection).unwrap();
            for (name, app) in self.entries(&collection) {
                let replicas = app.pointer("/spec/replicas").and_then(Value::as_u64).unwrap_or(1);
                let labels = json!({"app": name, OWNER_LABEL: format!("exampleapp.{}", name)});
                self.ensure_pods(&namespace, &name, replicas, labels);
            }
        }

        for collection in self.collection_keys("/deployments") {
            let namespace = namespace_of(&collection).unwrap();
            for (name, mut deployment) in self.entries(&collection) {
                let replicas = deployment.pointer("/spec/replicas").and_then(Value::as_u64).unwrap_or(1);
                let mut labels = deployment
                    .pointer("/spec/template/metadata/labels")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                labels[OWNER_LABEL] = json!(format!("deployment.{}", name));
                self.ensure_pods(&namespace, &format!("{}-pod", name), replicas, labels);

                let status = json!({"replicas": replicas, "readyReplicas": replicas});
                if deployment.get("status") != Some(&status) {
                    deployment["status"] = status;
                    self.put(&collection, &name, deployment);
                }
            }
        }
    }

    /// Ensure pods `<prefix>-0 .. <prefix>-<replicas-1>` exist; surplus ones are collected later
    fn ensure_pods(&mut self, namespace: &str, prefix: &str, replicas: u64, labels: Value) {
        let pods = paths::core(namespace, "pods");
        for i in 0..replicas {
            let pod_name = format!("{}-{}", prefix, i);
            if self.get(&pods, &pod_name).is_none() {
                self.put(&pods, &pod_name, ready_pod(labels.clone()));
            }
        }
    }

    /// Remove pods whose owner is gone or which exceed the owner's replica count
    fn collect_orphan_pods(&mut self) {
        for collection in self.collection_keys("/pods") {
            let namespace = namespace_of(&collection).unwrap();
            for (name, pod) in self.entries(&collection) {
                let Some(owner) = pod.pointer("/metadata/labels").and_then(|l| l.get(OWNER_LABEL)) else {
                    continue;
                };
                let owner = owner.as_str().unwrap_or_default().to_string();
                let keep = match owner.split_once('.') {
                    Some(("csv", csv)) => self
                        .get(&paths::olm(&namespace, "clusterserviceversions"), csv)
                        .is_some(),
                    Some(("exampleapp", app)) => self
                        .get(&paths::example_apps(&namespace), app)
                        .is_some_and(|a| within_replicas(a, &name, app)),
                    Some(("deployment", deployment)) => self
                        .get(&paths::deployments(&namespace), deployment)
                        .is_some_and(|d| within_replicas(d, &name, &format!("{}-pod", deployment))),
                    _ => true,
                };
                if !keep {
                    self.remove(&collection, &name);
                }
            }
        }
    }
}

fn within_replicas(owner: &Value, pod_name: &str, prefix: &str) -> bool {
    let replicas = owner.pointer("/spec/replicas").and_then(Value::as_u64).unwrap_or(1);
    pod_name
        .strip_prefix(&format!("{}-", prefix))
        .and_then(|i| i.parse::<u64>().ok())
        .is_some_and(|i| i < replicas)
}

fn ready_pod(labels: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"labels": labels},
        "spec": {"containers": [{"name": "main", "image": "registry.example.com/fake:latest"}]},
        "status": {"phase": "Running", "conditions": [{"type": "Ready", "status": "True"}]},
    })
}

fn package_manifest(namespace: &str, catalog: &str, package: &str, channel: &str) -> Value {
    json!({
        "apiVersion": "packages.operators.coreos.com/v1",
        "kind": "PackageManifest",
        "metadata": {"name": package, "labels": {"catalog": catalog, "catalog-namespace": namespace}},
        "spec": {},
        "status": {
            "catalogSource": catalog,
            "catalogSourceNamespace": namespace,
            "defaultChannel": channel,
            "channels": [{"name": channel, "currentCSV": format!("{}.v1.0.0", package)}],
        },
    })
}

struct Target {
    collection: String,
    name: Option<String>,
}

/// Split an API path into its collection and optional object name
fn parse_path(path: &str) -> Option<Target> {
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let prefix_len = match segments.first() {
        Some(&"api") => 2,
        Some(&"apis") => 3,
        _ => return None,
    };
    if segments.len() <= prefix_len {
        return None;
    }
    let prefix = segments[..prefix_len].join("/");
    let rest = &segments[prefix_len..];
    let (collection, rest) = if rest[0] == "namespaces" && rest.len() >= 3 {
        (format!("/{}/namespaces/{}/{}", prefix, rest[1], rest[2]), &rest[3..])
    } else {
        (format!("/{}/{}", prefix, rest[0]), &rest[1..])
    };

    Some(Target {
        collection,
        name: rest.first().map(|s| s.to_string()),
    })
}

fn namespace_of(collection: &str) -> Option<String> {
    let segments: Vec<&str> = collection.split('/').collect();
    segments
        .iter()
        .position(|s| *s == "namespaces")
        .filter(|i| i + 2 < segments.len())
        .map(|i| segments[i + 1].to_string())
}

/// Equality (`a=b`, `a==b`), inequality (`a!=b`) and existence (`a`) requirements
fn matches_selector(object: &Value, selector: &str) -> bool {
    let labels = object.pointer("/metadata/labels").cloned().unwrap_or_else(|| json!({}));
    selector
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .all(|requirement| {
            if let Some((k, v)) = requirement.split_once("!=") {
                labels.get(k.trim()).and_then(Value::as_str) != Some(v.trim())
            } else if let Some((k, v)) = requirement.split_once('=') {
                labels.get(k.trim()).and_then(Value::as_str) == Some(v.trim_start_matches('=').trim())
            } else {
                labels.get(requirement).is_some()
            }
        })
}

/// RFC 7386 JSON merge patch
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let target = target.as_object_mut().unwrap();
    for (key, value) in patch {
        if value.is_null() {
            target.remove(key);
        } else {
            merge(target.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

fn status(code: u16, reason: &str, message: &str) -> (u16, Value) {
    (
        code,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code,
        }),
    )
}

fn not_found(name: &str) -> (u16, Value) {
    status(404, "NotFound", &format!("\"{}\" not found", name))
}

impl Service<Request<Body>> for FakeCluster {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let fake = self.clone();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Box::pin(async move {
            let body = req.into_body().collect().await?.to_bytes();
            let (code, payload) = fake.handle(&method, &path, &query, &content_type, &body);
            Ok(Response::builder()
                .status(code)
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string().into_bytes()))
                .unwrap())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        let t = parse_path("/api/v1/namespaces/it/pods/demo-0").unwrap();
        assert_eq!(t.collection, "/api/v1/namespaces/it/pods");
        assert_eq!(t.name.as_deref(), Some("demo-0"));

        let t = parse_path("/api/v1/namespaces/it").unwrap();
        assert_eq!(t.collection, "/api/v1/namespaces");
        assert_eq!(t.name.as_deref(), Some("it"));

        let t = parse_path("/apis/apiextensions.k8s.io/v1/customresourcedefinitions").unwrap();
        assert_eq!(t.collection, paths::crds());
        assert!(t.name.is_none());
    }

    #[test]
    fn test_matches_selector() {
        let obj = json!({"metadata": {"labels": {"app": "demo", "tier": "web"}}});
        assert!(matches_selector(&obj, ""));
        assert!(matches_selector(&obj, "app=demo,tier==web"));
        assert!(matches_selector(&obj, "app!=other"));
        assert!(matches_selector(&obj, "tier"));
        assert!(!matches_selector(&obj, "app=other"));
    }

    #[test]
    fn test_merge_patch() {
        let mut target = json!({"spec": {"replicas": 1, "image": "a"}, "status": {"ready": true}});
        merge(&mut target, &json!({"spec": {"replicas": 3, "image": null}}));
        assert_eq!(target, json!({"spec": {"replicas": 3}, "status": {"ready": true}}));
    }
}
