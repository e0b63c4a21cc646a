use anyhow::Context;
use cartobase_core::bootstrap::{queue_standard_tasks, Apt, HostProbe};
use cartobase_core::{Config, Orchestrator, RunContext, Settings};
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path) -> anyhow::Result<()> {
    // provisioning usually runs before any config exists; defaults are fine
    let settings = if config_path.exists() {
        Config::load(config_path)
            .context("failed to load config")?
            .settings
    } else {
        Settings::default()
    };

    let mut orch = Orchestrator::new();
    queue_standard_tasks(&mut orch, Arc::new(HostProbe::new()), Arc::new(Apt::new()));

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let mut ctx = RunContext::new();
        orch.run(&mut ctx, &settings).await
    });

    for failure in &report.failures {
        println!("[failed] {}: {}", failure.task, failure.message);
    }
    if let Some(task) = &report.halted_on {
        anyhow::bail!("provisioning halted on task '{task}'");
    }

    println!(
        "Provisioning complete: {} task(s) executed, {} failure(s).",
        report.executed,
        report.failures.len()
    );
    Ok(())
}
