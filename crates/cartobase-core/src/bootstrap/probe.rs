//! Host inspection and package installation seams.
//!
//! The bootstrap tasks talk to the system through these two traits so tests
//! can substitute fakes; the host implementations shell out to `which`,
//! `dpkg-query` and `apt-get`.

use crate::error::{CartobaseError, Result};
use crate::proc;
use std::process::{Command, Stdio};
use tracing::debug;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only checks against the host.
pub trait SystemProbe: Send + Sync {
    /// Whether `name` resolves to an executable on PATH.
    fn command_on_path(&self, name: &str) -> bool;

    /// Whether the deb package is in "install ok installed" state.
    fn deb_installed(&self, package: &str) -> Result<bool>;
}

/// Privileged package operations.
pub trait PackageManager: Send + Sync {
    /// Refresh the package index.
    fn update(&self) -> Result<()>;

    /// Install the named packages, assuming the index is current.
    fn install(&self, packages: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HostProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct HostProbe;

impl HostProbe {
    pub fn new() -> Self {
        Self
    }
}

impl SystemProbe for HostProbe {
    fn command_on_path(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    fn deb_installed(&self, package: &str) -> Result<bool> {
        let output = Command::new("dpkg-query")
            .args(["-W", "-f=${Status}", package])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CartobaseError::ToolSpawn {
                tool: "dpkg-query".to_string(),
                detail: e.to_string(),
            })?;
        // unknown packages exit non-zero, which means "not installed"
        Ok(output.status.success()
            && String::from_utf8_lossy(&output.stdout).contains("install ok installed"))
    }
}

// ---------------------------------------------------------------------------
// Apt
// ---------------------------------------------------------------------------

/// apt-get wrapper, elevating with sudo when not running as root.
#[derive(Debug)]
pub struct Apt {
    elevate: bool,
}

impl Apt {
    pub fn new() -> Self {
        let root = running_as_root();
        debug!(elevate = !root, "package manager configured");
        Self { elevate: !root }
    }

    /// Force the elevation decision instead of probing the host.
    pub fn with_elevation(elevate: bool) -> Self {
        Self { elevate }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = if self.elevate {
            let mut c = Command::new("sudo");
            c.arg("apt-get");
            c
        } else {
            Command::new("apt-get")
        };
        cmd.args(args);
        cmd.env("DEBIAN_FRONTEND", "noninteractive");
        cmd
    }
}

impl Default for Apt {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageManager for Apt {
    fn update(&self) -> Result<()> {
        proc::run_streamed("apt-get", &mut self.command(&["update"]))
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["install", "-y"];
        args.extend(packages.iter().map(String::as_str));
        proc::run_streamed("apt-get", &mut self.command(&args))
    }
}

fn running_as_root() -> bool {
    // A host without `id` is a minimal container, almost certainly root.
    Command::new("id")
        .arg("-u")
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
        .unwrap_or(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
