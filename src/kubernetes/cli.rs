// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Passthrough to the cluster admin CLI (`oc` / `kubectl`) for manifests the engine does not model.

use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error, instrument};

/// Runs admin CLI commands against one namespace
#[derive(Debug, Clone)]
pub struct AdminCli {
    binary: String,
    namespace: String,
}

impl AdminCli {
    pub fn new(binary: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            namespace: namespace.into(),
        }
    }

    /// `apply -f <file>`
    pub async fn apply_file(&self, path: &Path) -> Option<String> {
        let path = path.to_string_lossy();
        self.run(&["apply", "-f", &path]).await
    }

    /// `delete all -l <selector>`
    pub async fn delete_by_label(&self, selector: &str) -> Option<String> {
        self.run(&["delete", "all", "-l", selector]).await
    }

    /// Run the CLI in the configured namespace, returning stdout and stderr combined.
    ///
    /// Any failure to spawn or a non-zero exit yields `None`.
    #[instrument(skip(self), fields(binary = %self.binary))]
    pub async fn run(&self, args: &[&str]) -> Option<String> {
        let output = match Command::new(&self.binary)
            .args(args)
            .arg("-n")
            .arg(&self.namespace)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!("Failed to execute {}: {}", self.binary, e);
                return None;
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            error!("{} {} failed: {}", self.binary, args.join(" "), combined.trim());
            return None;
        }

        debug!("{} {} succeeded", self.binary, args.join(" "));
        Some(combined)
    }
}
