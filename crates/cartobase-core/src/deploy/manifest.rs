//! Manifest discovery and application.

use crate::context::{RunContext, TaskOutput};
use crate::deploy::hook::{apply_manifest_hooks, DeployHook};
use crate::error::{CartobaseError, Result};
use crate::orchestrator::Task;
use crate::proc;
use crate::settings::Settings;
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::info;

/// Manifests in a directory, sorted by file name so apply order is stable
/// and can be steered with numeric prefixes.
pub fn list_manifests(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CartobaseError::Config(format!(
            "manifest directory '{}' does not exist",
            dir.display()
        )));
    }
    let mut manifests = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if path.is_file() && is_yaml {
            manifests.push(path);
        }
    }
    manifests.sort();
    Ok(manifests)
}

pub(crate) fn kubectl_command(path: &Path) -> Command {
    let mut cmd = Command::new("kubectl");
    cmd.arg("apply").arg("-f").arg(path);
    cmd
}

// ---------------------------------------------------------------------------
// ApplyManifest
// ---------------------------------------------------------------------------

/// One orchestrator task per manifest file.
pub struct ApplyManifest {
    name: String,
    path: PathBuf,
    hooks: Arc<Vec<Box<dyn DeployHook>>>,
}

impl ApplyManifest {
    pub fn new(path: PathBuf, hooks: Arc<Vec<Box<dyn DeployHook>>>) -> Self {
        let name = format!(
            "apply-{}",
            path.file_stem().and_then(|s| s.to_str()).unwrap_or("manifest")
        );
        Self { name, path, hooks }
    }
}

#[async_trait]
impl Task for ApplyManifest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &mut RunContext, _settings: &Settings) -> Result<TaskOutput> {
        let mut text = std::fs::read_to_string(&self.path)?;
        let amended = apply_manifest_hooks(&self.hooks, &mut text)?;

        let stdout = if amended > 0 {
            // kubectl reads the amended copy from a scratch file
            let mut scratch = tempfile::NamedTempFile::new()?;
            scratch.write_all(text.as_bytes())?;
            scratch.flush()?;
            proc::run_captured("kubectl", &mut kubectl_command(scratch.path()))?
        } else {
            proc::run_captured("kubectl", &mut kubectl_command(&self.path))?
        };
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!(manifest = %self.path.display(), "kubectl: {line}");
        }

        Ok(json!({
            "manifest": self.path.display().to_string(),
            "hooks_amended": amended,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
