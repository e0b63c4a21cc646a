//! Kubernetes deploy sequencing.
//!
//! Manifests apply strictly in sorted order, one fatal task each: a failed
//! apply stops the run before later manifests can build on missing objects.

pub mod hook;
pub mod manifest;

pub use hook::{apply_config_hooks, DeployHook, HookOutcome};
pub use manifest::{list_manifests, ApplyManifest};

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use std::path::Path;
use std::sync::Arc;

/// Queue one apply task per manifest found in `dir`.
pub fn queue_manifest_tasks(
    orchestrator: &mut Orchestrator,
    dir: &Path,
    hooks: Arc<Vec<Box<dyn DeployHook>>>,
) -> Result<usize> {
    let manifests = manifest::list_manifests(dir)?;
    let count = manifests.len();
    for path in manifests {
        orchestrator.add_task(Box::new(ApplyManifest::new(path, Arc::clone(&hooks))), true);
    }
    Ok(count)
}
