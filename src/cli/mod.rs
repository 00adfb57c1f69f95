//! CLI subcommands — validate, plan, apply, outputs.

use crate::core::applier::{self, ApplyOptions};
use crate::core::planner;
use crate::core::types::{ExportSet, NodeOutcome};
use crate::error::{Error, Result};
use crate::provenance::eventlog::EventLog;
use crate::provider::sim::SimulatedCloud;
use crate::topology::{self, TopologyParams, TOPOLOGY_NAME};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check the topology graph for cycles and dangling references
    Validate,

    /// Show the execution order and concurrency waves
    Plan,

    /// Provision the topology against the simulated cloud
    Apply {
        /// State directory for the cloud's resource table and event log
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Maximum concurrent provisioning calls (default: unbounded)
        #[arg(long)]
        limit: Option<usize>,

        /// Inject a failure for one resource (exercises fail-fast abort)
        #[arg(long)]
        fail: Option<String>,
    },

    /// Collect the export set from a previous apply's state
    Outputs {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Validate => cmd_validate(),
        Commands::Plan => cmd_plan(),
        Commands::Apply {
            state_dir,
            limit,
            fail,
        } => cmd_apply(&state_dir, limit, fail.as_deref()),
        Commands::Outputs { state_dir } => cmd_outputs(&state_dir),
    }
}

fn cmd_validate() -> Result<()> {
    let (graph, exporter) = topology::build(&TopologyParams::default())?;
    println!(
        "OK: {} ({} resources, {} edges, {} waves, {} exports)",
        TOPOLOGY_NAME,
        graph.len(),
        graph.edge_count(),
        graph.waves().len(),
        exporter.len()
    );
    Ok(())
}

fn cmd_plan() -> Result<()> {
    let (graph, _) = topology::build(&TopologyParams::default())?;
    let plan = planner::plan(&graph);

    println!("Planning: {} ({} resources)", TOPOLOGY_NAME, plan.len());
    println!();
    let mut current_wave = usize::MAX;
    for step in &plan.steps {
        if step.wave != current_wave {
            current_wave = step.wave;
            println!("wave {}:", current_wave);
        }
        println!("  + {}", step.description);
    }
    println!();
    println!(
        "Plan: {} to add across {} waves.",
        plan.len(),
        plan.waves.len()
    );
    Ok(())
}

fn cmd_apply(state_dir: &Path, limit: Option<usize>, fail: Option<&str>) -> Result<()> {
    let (graph, exporter) = topology::build(&TopologyParams::default())?;
    let cloud = Arc::new(SimulatedCloud::with_state_dir(state_dir)?);
    if let Some(name) = fail {
        cloud.fail_on(name);
    }

    let options = ApplyOptions {
        limit,
        events: Some(EventLog::new(state_dir)),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(applier::apply(
        &graph,
        Arc::clone(&cloud) as Arc<dyn crate::provider::Provisioner>,
        &options,
    ))?;

    // The cloud's table persists even after a failed run; completed
    // resources stay converged for the next apply.
    cloud.save()?;

    let report = &outcome.report;
    println!(
        "{}: {} provisioned, {} unchanged, {} failed, {} never started ({:.1}s)",
        TOPOLOGY_NAME,
        report.provisioned,
        report.unchanged,
        report.failed,
        report.never_started,
        report.total_duration.as_secs_f64()
    );

    if let Some(failure) = &report.failure {
        println!();
        for (name, outcome) in &report.outcomes {
            if !matches!(outcome, NodeOutcome::Provisioned | NodeOutcome::Unchanged) {
                println!("  {}: {}", name, outcome);
            }
        }
        return Err(Error::from(failure.clone()));
    }

    let exports = exporter.collect(&outcome.outputs)?;
    println!();
    print_exports(&exports);
    Ok(())
}

fn cmd_outputs(state_dir: &Path) -> Result<()> {
    if !SimulatedCloud::state_file(state_dir).exists() {
        println!("No state found. Run `cumulo apply` first.");
        return Ok(());
    }

    let (_, exporter) = topology::build(&TopologyParams::default())?;
    let cloud = SimulatedCloud::with_state_dir(state_dir)?;
    let exports = exporter.collect(&cloud.resolved_outputs())?;
    print_exports(&exports);
    Ok(())
}

fn print_exports(exports: &ExportSet) {
    println!("Outputs:");
    for (name, value) in exports {
        println!("  {name} = {value}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        cmd_validate().unwrap();
    }

    #[test]
    fn test_plan() {
        cmd_plan().unwrap();
    }

    #[test]
    fn test_apply_writes_state_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        cmd_apply(&state, None, None).unwrap();

        assert!(SimulatedCloud::state_file(&state).exists());
        assert!(state.join("events.jsonl").exists());

        let events = std::fs::read_to_string(state.join("events.jsonl")).unwrap();
        assert!(events.contains("apply_started"));
        assert!(events.contains("apply_completed"));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        cmd_apply(&state, None, None).unwrap();
        cmd_apply(&state, None, None).unwrap();

        let events = std::fs::read_to_string(state.join("events.jsonl")).unwrap();
        assert!(events.contains("resource_unchanged"));
    }

    #[test]
    fn test_apply_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        cmd_apply(&dir.path().join("state"), Some(2), None).unwrap();
    }

    #[test]
    fn test_apply_with_injected_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let err = cmd_apply(&state, None, Some("eks-cluster")).unwrap_err();
        assert!(matches!(err, Error::Provisioning { .. }));

        // Completed prefix persists for the next run.
        assert!(SimulatedCloud::state_file(&state).exists());
    }

    #[test]
    fn test_failed_then_clean_apply_converges() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        cmd_apply(&state, None, Some("eks-cluster")).unwrap_err();
        cmd_apply(&state, None, None).unwrap();
    }

    #[test]
    fn test_outputs_without_state() {
        let dir = tempfile::tempdir().unwrap();
        cmd_outputs(&dir.path().join("state")).unwrap();
    }

    #[test]
    fn test_outputs_after_apply() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        cmd_apply(&state, None, None).unwrap();
        cmd_outputs(&state).unwrap();
    }

    #[test]
    fn test_dispatch_validate() {
        dispatch(Commands::Validate).unwrap();
    }

    #[test]
    fn test_dispatch_apply_and_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        dispatch(Commands::Apply {
            state_dir: state.clone(),
            limit: None,
            fail: None,
        })
        .unwrap();
        dispatch(Commands::Outputs { state_dir: state }).unwrap();
    }
}
