// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Operator Lifecycle Manager integration

pub mod catalog;
pub mod subscription;

pub use catalog::{CatalogCoordinates, CatalogSourceResolver};
pub use subscription::{SubscriptionManager, SubscriptionState};
