// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use kube::Client;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use intersmash::config::Config;
use intersmash::constants::labels;
use intersmash::kubernetes::AdminCli;
use intersmash::provisioner::{teardown, Provisioner, ProvisionerRegistry, ProvisioningContext};
use intersmash::types::application::ApplicationDescriptor;

/// Provision the application described in a YAML file, verify it, then tear everything down.
///
/// Usage: `intersmash <descriptor.yaml> [extra-manifest.yaml...]`. Extra manifests are applied
/// with the admin CLI after the application is deployed.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(descriptor_path) = args.next().map(PathBuf::from) else {
        bail!("usage: intersmash <descriptor.yaml> [extra-manifest.yaml...]");
    };
    let manifests: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: namespace={}, catalog={}/{}",
        config.namespace, config.marketplace_namespace, config.default_catalog_source
    );
    let cli = AdminCli::new(config.admin_cli.clone(), config.namespace.clone());

    let descriptor = read_descriptor(&descriptor_path)?;
    let application = descriptor.into_application();

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let ctx = ProvisioningContext::new(client, config);
    let registry = ProvisionerRegistry::with_defaults()?;
    let mut provisioner = registry.provisioner_for(application.clone(), &ctx)?;

    let outcome = run(provisioner.as_mut(), &cli, &manifests).await;
    if let Err(e) = &outcome {
        error!("Provisioning {} failed: {}", application.name(), e);
    }

    if !manifests.is_empty() {
        let selector = format!("{}={}", labels::APPLICATION, application.name());
        if cli.delete_by_label(&selector).await.is_none() {
            warn!("Failed to delete extra manifests labelled {}", selector);
        }
    }
    if let Err(e) = teardown(provisioner.as_mut()).await {
        warn!("Teardown of {} incomplete: {}", application.name(), e);
    }

    outcome
}

fn read_descriptor(path: &Path) -> Result<ApplicationDescriptor> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn run(provisioner: &mut dyn Provisioner, cli: &AdminCli, manifests: &[PathBuf]) -> Result<()> {
    provisioner.configure().await?;
    provisioner.pre_deploy().await?;
    provisioner.deploy().await?;
    let pods = provisioner.pods().await?;
    info!("{} is up with {} pod(s)", provisioner.application().name(), pods.len());

    match provisioner.url() {
        Ok(url) => info!("{} is reachable at {}", provisioner.application().name(), url),
        Err(e) => info!("{}", e),
    }

    for manifest in manifests {
        if cli.apply_file(manifest).await.is_none() {
            bail!("failed to apply {}", manifest.display());
        }
        info!("Applied {}", manifest.display());
    }
    Ok(())
}
