//! The "ensure installed" task implementations.
//!
//! Both tasks follow the same shape: check, install only if the check fails,
//! re-check. A failed re-check is an error for critical prerequisites and a
//! warning for optional ones; a package-manager failure always propagates,
//! since nothing later can install anything either.

use crate::bootstrap::probe::{PackageManager, SystemProbe};
use crate::context::{RunContext, TaskOutput};
use crate::error::{CartobaseError, Result};
use crate::orchestrator::{Orchestrator, Task};
use crate::settings::Settings;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Shared install step
// ---------------------------------------------------------------------------

/// Refresh the index at most once per run, then install.
fn install_packages(
    ctx: &mut RunContext,
    pkg: &dyn PackageManager,
    packages: &[String],
) -> Result<()> {
    ctx.any_install_attempted = true;
    if !ctx.apt_updated_this_run {
        info!("refreshing package index");
        pkg.update()?;
        ctx.apt_updated_this_run = true;
    }
    info!(packages = ?packages, "installing");
    pkg.install(packages)
}

// ---------------------------------------------------------------------------
// EnsureCommand
// ---------------------------------------------------------------------------

/// Ensures a command is on PATH, installing the packages that provide it.
pub struct EnsureCommand {
    name: String,
    command: String,
    packages: Vec<String>,
    critical: bool,
    probe: Arc<dyn SystemProbe>,
    pkg: Arc<dyn PackageManager>,
}

impl EnsureCommand {
    pub fn new(
        command: impl Into<String>,
        packages: Vec<String>,
        critical: bool,
        probe: Arc<dyn SystemProbe>,
        pkg: Arc<dyn PackageManager>,
    ) -> Self {
        let command = command.into();
        Self {
            name: format!("ensure-{command}"),
            command,
            packages,
            critical,
            probe,
            pkg,
        }
    }
}

#[async_trait]
impl Task for EnsureCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut RunContext, _settings: &Settings) -> Result<TaskOutput> {
        if self.probe.command_on_path(&self.command) {
            info!(command = %self.command, "already present");
            return Ok(json!({"present": true, "installed": false}));
        }

        install_packages(ctx, self.pkg.as_ref(), &self.packages)?;

        if self.probe.command_on_path(&self.command) {
            info!(command = %self.command, "installed");
            Ok(json!({"present": true, "installed": true}))
        } else if self.critical {
            Err(CartobaseError::Task {
                task: self.name.clone(),
                detail: format!(
                    "'{}' still missing after installing {:?}",
                    self.command, self.packages
                ),
            })
        } else {
            warn!(
                command = %self.command,
                "still missing after install; continuing without it"
            );
            Ok(json!({"present": false, "installed": true}))
        }
    }
}

// ---------------------------------------------------------------------------
// EnsureDebPackage
// ---------------------------------------------------------------------------

/// Ensures a deb package is installed, by dpkg state rather than PATH.
pub struct EnsureDebPackage {
    name: String,
    package: String,
    critical: bool,
    probe: Arc<dyn SystemProbe>,
    pkg: Arc<dyn PackageManager>,
}

impl EnsureDebPackage {
    pub fn new(
        package: impl Into<String>,
        critical: bool,
        probe: Arc<dyn SystemProbe>,
        pkg: Arc<dyn PackageManager>,
    ) -> Self {
        let package = package.into();
        Self {
            name: format!("ensure-pkg-{package}"),
            package,
            critical,
            probe,
            pkg,
        }
    }
}

#[async_trait]
impl Task for EnsureDebPackage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut RunContext, _settings: &Settings) -> Result<TaskOutput> {
        if self.probe.deb_installed(&self.package)? {
            info!(package = %self.package, "already installed");
            return Ok(json!({"present": true, "installed": false}));
        }

        install_packages(ctx, self.pkg.as_ref(), std::slice::from_ref(&self.package))?;

        if self.probe.deb_installed(&self.package)? {
            info!(package = %self.package, "installed");
            Ok(json!({"present": true, "installed": true}))
        } else if self.critical {
            Err(CartobaseError::Task {
                task: self.name.clone(),
                detail: format!("package '{}' still missing after install", self.package),
            })
        } else {
            warn!(package = %self.package, "still missing after install; continuing");
            Ok(json!({"present": false, "installed": true}))
        }
    }
}

// ---------------------------------------------------------------------------
// Standard task set
// ---------------------------------------------------------------------------

/// Queue the prerequisites of a map/transit server, in dependency order.
///
/// Everything is queued fatal: even the optional diagnostic task only treats
/// its own re-check leniently — an apt failure inside it still halts the run.
pub fn queue_standard_tasks(
    orch: &mut Orchestrator,
    probe: Arc<dyn SystemProbe>,
    pkg: Arc<dyn PackageManager>,
) {
    let cmd = |command: &str, packages: &[&str], critical: bool| {
        Box::new(EnsureCommand::new(
            command,
            packages.iter().map(|p| p.to_string()).collect(),
            critical,
            Arc::clone(&probe),
            Arc::clone(&pkg),
        ))
    };

    orch.add_task(cmd("docker", &["docker.io"], true), true);
    orch.add_task(cmd("kubectl", &["kubectl"], true), true);
    orch.add_task(cmd("ogr2ogr", &["gdal-bin"], true), true);
    orch.add_task(cmd("psql", &["postgresql-client"], true), true);
    orch.add_task(
        Box::new(EnsureDebPackage::new(
            "postgis",
            true,
            Arc::clone(&probe),
            Arc::clone(&pkg),
        )),
        true,
    );
    // diagnostic only; a host without pv still provisions fine
    orch.add_task(cmd("pv", &["pv"], false), true);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory host: installing a package makes its command appear on PATH
    /// (unless the package is listed as broken).
    #[derive(Default)]
    struct FakeSystem {
        on_path: Mutex<HashSet<String>>,
        installed_debs: Mutex<HashSet<String>>,
        /// package -> command it provides
        provides: HashMap<String, String>,
        broken_packages: HashSet<String>,
        updates: AtomicUsize,
        installs: AtomicUsize,
        fail_apt: bool,
    }

    impl SystemProbe for FakeSystem {
        fn command_on_path(&self, name: &str) -> bool {
            self.on_path.lock().unwrap().contains(name)
        }

        fn deb_installed(&self, package: &str) -> Result<bool> {
            Ok(self.installed_debs.lock().unwrap().contains(package))
        }
    }

    impl PackageManager for FakeSystem {
        fn update(&self) -> Result<()> {
            if self.fail_apt {
                return Err(CartobaseError::ToolFailed {
                    tool: "apt-get".to_string(),
                    status: 100,
                    detail: "could not resolve archive.ubuntu.com".to_string(),
                });
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn install(&self, packages: &[String]) -> Result<()> {
            if self.fail_apt {
                return Err(CartobaseError::ToolFailed {
                    tool: "apt-get".to_string(),
                    status: 100,
                    detail: "unable to locate package".to_string(),
                });
            }
            self.installs.fetch_add(1, Ordering::SeqCst);
            for package in packages {
                if self.broken_packages.contains(package) {
                    continue;
                }
                self.installed_debs
                    .lock()
                    .unwrap()
                    .insert(package.clone());
                if let Some(command) = self.provides.get(package) {
                    self.on_path.lock().unwrap().insert(command.clone());
                }
            }
            Ok(())
        }
    }

    fn system_with(provides: &[(&str, &str)]) -> Arc<FakeSystem> {
        Arc::new(FakeSystem {
            provides: provides
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            ..FakeSystem::default()
        })
    }

    fn ensure_cmd(sys: &Arc<FakeSystem>, command: &str, package: &str, critical: bool) -> Box<EnsureCommand> {
        Box::new(EnsureCommand::new(
            command,
            vec![package.to_string()],
            critical,
            Arc::clone(sys) as Arc<dyn SystemProbe>,
            Arc::clone(sys) as Arc<dyn PackageManager>,
        ))
    }

    #[tokio::test]
    async fn present_command_performs_no_installs() {
        let sys = system_with(&[]);
        sys.on_path.lock().unwrap().insert("docker".to_string());

        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(report.succeeded());
        assert_eq!(sys.installs.load(Ordering::SeqCst), 0);
        assert_eq!(sys.updates.load(Ordering::SeqCst), 0);
        assert!(!ctx.any_install_attempted);
    }

    #[tokio::test]
    async fn missing_command_installs_and_reverifies() {
        let sys = system_with(&[("gdal-bin", "ogr2ogr")]);
        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "ogr2ogr", "gdal-bin", true), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(report.succeeded());
        assert_eq!(sys.updates.load(Ordering::SeqCst), 1);
        assert_eq!(sys.installs.load(Ordering::SeqCst), 1);
        assert!(ctx.any_install_attempted);
        assert_eq!(
            ctx.output("ensure-ogr2ogr"),
            Some(&json!({"present": true, "installed": true}))
        );
    }

    #[tokio::test]
    async fn index_refresh_happens_once_per_run() {
        let sys = system_with(&[("docker.io", "docker"), ("gdal-bin", "ogr2ogr")]);
        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);
        orch.add_task(ensure_cmd(&sys, "ogr2ogr", "gdal-bin", true), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(report.succeeded());
        assert_eq!(sys.installs.load(Ordering::SeqCst), 2);
        assert_eq!(sys.updates.load(Ordering::SeqCst), 1);
        assert!(ctx.apt_updated_this_run);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let sys = system_with(&[("docker.io", "docker"), ("postgis", "postgis")]);

        let mut first = Orchestrator::new();
        first.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);
        first.add_task(
            Box::new(EnsureDebPackage::new(
                "postgis",
                true,
                Arc::clone(&sys) as Arc<dyn SystemProbe>,
                Arc::clone(&sys) as Arc<dyn PackageManager>,
            )),
            true,
        );
        let mut ctx = RunContext::new();
        assert!(first.run(&mut ctx, &Settings::default()).await.succeeded());
        let installs_after_first = sys.installs.load(Ordering::SeqCst);
        assert_eq!(installs_after_first, 2);

        // fresh context, same host state
        let mut second = Orchestrator::new();
        second.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);
        second.add_task(
            Box::new(EnsureDebPackage::new(
                "postgis",
                true,
                Arc::clone(&sys) as Arc<dyn SystemProbe>,
                Arc::clone(&sys) as Arc<dyn PackageManager>,
            )),
            true,
        );
        let mut ctx2 = RunContext::new();
        let report = second.run(&mut ctx2, &Settings::default()).await;

        assert!(report.succeeded());
        assert_eq!(sys.installs.load(Ordering::SeqCst), installs_after_first);
        assert!(!ctx2.any_install_attempted);
    }

    #[tokio::test]
    async fn critical_reverify_failure_halts_the_run() {
        let sys = Arc::new(FakeSystem {
            broken_packages: ["kubectl".to_string()].into_iter().collect(),
            ..FakeSystem::default()
        });

        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "kubectl", "kubectl", true), true);
        orch.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(!report.completed);
        assert_eq!(report.halted_on.as_deref(), Some("ensure-kubectl"));
        // the docker task after the halt never ran
        assert_eq!(sys.installs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn optional_reverify_failure_only_warns() {
        let sys = Arc::new(FakeSystem {
            broken_packages: ["pv".to_string()].into_iter().collect(),
            provides: [("docker.io".to_string(), "docker".to_string())]
                .into_iter()
                .collect(),
            ..FakeSystem::default()
        });

        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "pv", "pv", false), true);
        orch.add_task(ensure_cmd(&sys, "docker", "docker.io", true), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(report.succeeded());
        assert_eq!(
            ctx.output("ensure-pv"),
            Some(&json!({"present": false, "installed": true}))
        );
        assert_eq!(
            ctx.output("ensure-docker"),
            Some(&json!({"present": true, "installed": true}))
        );
    }

    #[tokio::test]
    async fn apt_failure_is_fatal_even_for_optional_tasks() {
        let sys = Arc::new(FakeSystem {
            fail_apt: true,
            ..FakeSystem::default()
        });

        let mut orch = Orchestrator::new();
        orch.add_task(ensure_cmd(&sys, "pv", "pv", false), true);

        let mut ctx = RunContext::new();
        let report = orch.run(&mut ctx, &Settings::default()).await;

        assert!(!report.completed);
        assert_eq!(report.halted_on.as_deref(), Some("ensure-pv"));
        assert!(report.failures[0].message.contains("apt-get"));
    }

    #[tokio::test]
    async fn standard_set_is_queued_in_order() {
        let sys = system_with(&[]);
        let mut orch = Orchestrator::new();
        queue_standard_tasks(
            &mut orch,
            Arc::clone(&sys) as Arc<dyn SystemProbe>,
            Arc::clone(&sys) as Arc<dyn PackageManager>,
        );
        assert_eq!(orch.len(), 6);
    }
}
