use anyhow::Context;
use cartobase_core::bootstrap::{HostProbe, SystemProbe};
use cartobase_core::deploy::{apply_config_hooks, queue_manifest_tasks, DeployHook};
use cartobase_core::{Config, Orchestrator, RunContext, Settings};
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, manifest_dir: &Path) -> anyhow::Result<()> {
    let mut settings = if config_path.exists() {
        Config::load(config_path)
            .context("failed to load config")?
            .settings
    } else {
        Settings::default()
    };

    // site-specific extensions implement DeployHook; none ship built in
    let hooks: Arc<Vec<Box<dyn DeployHook>>> = Arc::new(Vec::new());
    apply_config_hooks(&hooks, &mut settings)?;

    let mut orch = Orchestrator::new();
    let count = queue_manifest_tasks(&mut orch, manifest_dir, Arc::clone(&hooks))?;
    if count == 0 {
        println!("No manifests in {}.", manifest_dir.display());
        return Ok(());
    }

    if !HostProbe::new().command_on_path("kubectl") {
        anyhow::bail!("kubectl is not on PATH; run `cartobase provision` first");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let mut ctx = RunContext::new();
        orch.run(&mut ctx, &settings).await
    });

    if let Some(task) = &report.halted_on {
        for failure in &report.failures {
            eprintln!("[failed] {}: {}", failure.task, failure.message);
        }
        anyhow::bail!("deploy halted on '{task}'");
    }

    println!("Applied {count} manifest(s).");
    Ok(())
}
