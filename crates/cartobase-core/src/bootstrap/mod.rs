//! Idempotent "ensure installed" tasks for the host prerequisites.
//!
//! Each task checks a local condition (command on PATH, deb package
//! installed), installs through apt only when the check fails, and re-checks
//! afterwards. Tasks coordinate through the run context so the package index
//! is refreshed at most once per run no matter how many tasks install.

pub mod probe;
pub mod tasks;

pub use probe::{Apt, HostProbe, PackageManager, SystemProbe};
pub use tasks::{queue_standard_tasks, EnsureCommand, EnsureDebPackage};
