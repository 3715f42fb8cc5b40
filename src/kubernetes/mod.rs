// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery, client caching, pods and namespace management.

pub mod cli;
pub mod client;
pub mod crd;
pub mod namespaces;
pub mod pods;

pub use cli::AdminCli;
pub use client::{delete_if_exists, ClientRegistry};
pub use crd::{is_crd_established, wait_for_crds};
pub use namespaces::ensure_namespace_exists;
pub use pods::{count_pods, wait_for_ready_pods, PodCounts, PodWait};
