// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::error::{ProvisionError, Result};
use crate::provisioner::{ImageProvisioner, OperatorProvisioner, Provisioner, ProvisioningContext};
use crate::types::application::{kinds, Application};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Creates provisioners for the application kinds it claims
pub trait ProvisionerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn kinds(&self) -> Vec<String>;

    fn create(&self, application: Arc<dyn Application>, ctx: &ProvisioningContext) -> Result<Box<dyn Provisioner>>;
}

struct OperatorFactory;

impl ProvisionerFactory for OperatorFactory {
    fn name(&self) -> &str {
        "operator"
    }

    fn kinds(&self) -> Vec<String> {
        vec![kinds::OPERATOR.to_string()]
    }

    fn create(&self, application: Arc<dyn Application>, ctx: &ProvisioningContext) -> Result<Box<dyn Provisioner>> {
        Ok(Box::new(OperatorProvisioner::new(application, ctx.clone())?))
    }
}

struct ImageFactory;

impl ProvisionerFactory for ImageFactory {
    fn name(&self) -> &str {
        "image"
    }

    fn kinds(&self) -> Vec<String> {
        vec![kinds::IMAGE.to_string()]
    }

    fn create(&self, application: Arc<dyn Application>, ctx: &ProvisioningContext) -> Result<Box<dyn Provisioner>> {
        Ok(Box::new(ImageProvisioner::new(application, ctx.clone())?))
    }
}

/// Maps application kinds to the single factory able to provision them
#[derive(Default)]
pub struct ProvisionerRegistry {
    factories: HashMap<String, Arc<dyn ProvisionerFactory>>,
}

impl ProvisionerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing the operator and image provisioners
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(OperatorFactory))?;
        registry.register(Arc::new(ImageFactory))?;
        Ok(registry)
    }

    /// Register `factory` for all its kinds; nothing is registered if any kind is taken
    pub fn register(&mut self, factory: Arc<dyn ProvisionerFactory>) -> Result<()> {
        let kinds = factory.kinds();
        if let Some((kind, existing)) = kinds
            .iter()
            .find_map(|kind| self.factories.get(kind).map(|existing| (kind, existing)))
        {
            return Err(ProvisionError::AmbiguousFactory {
                kind: kind.clone(),
                existing: existing.name().to_string(),
                new: factory.name().to_string(),
            });
        }

        for kind in kinds {
            debug!("Registered provisioner factory {} for {}", factory.name(), kind);
            self.factories.insert(kind, factory.clone());
        }
        Ok(())
    }

    pub fn supports(&self, application: &dyn Application) -> bool {
        self.factories.contains_key(application.kind())
    }

    pub fn provisioner_for(
        &self,
        application: Arc<dyn Application>,
        ctx: &ProvisioningContext,
    ) -> Result<Box<dyn Provisioner>> {
        let factory = self
            .factories
            .get(application.kind())
            .ok_or_else(|| ProvisionError::UnsupportedApplicationType {
                name: application.name().to_string(),
                kind: application.kind().to_string(),
            })?;
        debug!("Using {} provisioner for {}", factory.name(), application.name());
        factory.create(application, ctx)
    }
}
