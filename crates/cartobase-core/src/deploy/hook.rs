//! Deploy-time extension interface.
//!
//! Hooks carry a fixed method set with no default bodies. An implementation
//! that wants to leave a stage alone says so by returning
//! [`HookOutcome::Skipped`] from that method; there is no inherited no-op to
//! hide behind.

use crate::error::Result;
use crate::settings::Settings;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Changed,
    Skipped,
}

pub trait DeployHook: Send + Sync {
    fn name(&self) -> &str;

    /// Adjust settings once, before any manifest is applied.
    fn amend_config(&self, settings: &mut Settings) -> Result<HookOutcome>;

    /// Rewrite one manifest's text before it is applied.
    fn amend_manifest(&self, manifest: &mut String) -> Result<HookOutcome>;
}

/// Run every hook's config stage; returns how many changed something.
pub fn apply_config_hooks(
    hooks: &[Box<dyn DeployHook>],
    settings: &mut Settings,
) -> Result<usize> {
    let mut changed = 0;
    for hook in hooks {
        if hook.amend_config(settings)? == HookOutcome::Changed {
            debug!(hook = hook.name(), "config amended");
            changed += 1;
        }
    }
    Ok(changed)
}

/// Run every hook over one manifest's text; returns how many changed it.
pub fn apply_manifest_hooks(
    hooks: &[Box<dyn DeployHook>],
    manifest: &mut String,
) -> Result<usize> {
    let mut changed = 0;
    for hook in hooks {
        if hook.amend_manifest(manifest)? == HookOutcome::Changed {
            debug!(hook = hook.name(), "manifest amended");
            changed += 1;
        }
    }
    Ok(changed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
