//! Command-line interface.
//!
//! `pipeline-runner --pipeline <path> --run-id <id> [--validate-offline]`.
//! Exit 0 when the run completes (including all-skipped runs), 1 when
//! the run fails or the machinery faults, 2 on configuration errors.

use camino::Utf8PathBuf;
use clap::Parser;

use crate::exit_codes::codes;
use crate::logging;
use crate::offline;
use crate::orchestrator::Orchestrator;
use crate::paths::PathLayout;
use crate::spec::PipelineSpec;

/// pipeline-runner - offline batch orchestrator for local file pipelines
#[derive(Parser, Debug)]
#[command(name = "pipeline-runner")]
#[command(about = "Execute a declared pipeline of processing stages against local files")]
#[command(version)]
pub struct Cli {
    /// Path to the pipeline declaration (JSON)
    #[arg(long)]
    pub pipeline: Utf8PathBuf,

    /// Identifier for this run; state files are keyed by it
    #[arg(long = "run-id")]
    pub run_id: String,

    /// Scan every stage processor for forbidden imports before running
    #[arg(long)]
    pub validate_offline: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Parse arguments, execute the run, and return the process exit code.
#[must_use]
pub fn run() -> i32 {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let root = match std::env::current_dir()
        .map_err(|e| e.to_string())
        .and_then(|p| Utf8PathBuf::from_path_buf(p).map_err(|p| format!("non-UTF-8 path: {}", p.display())))
    {
        Ok(root) => root,
        Err(e) => {
            eprintln!("Error: cannot resolve working directory: {e}");
            return codes::CONFIG;
        }
    };
    let layout = PathLayout::new(root);

    let spec = match PipelineSpec::load(&cli.pipeline, &layout) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Error: {e}");
            return codes::CONFIG;
        }
    };

    if cli.validate_offline {
        for stage in &spec.stages {
            if let Err(violation) = offline::scan_processor(&layout.resolve(&stage.processor)) {
                eprintln!("Error: offline validation failed for stage '{}': {violation}", stage.name);
                return codes::CONFIG;
            }
        }
        println!("[OFFLINE] Validation passed");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return codes::RUN_FAILED;
        }
    };

    let orchestrator = Orchestrator::new(layout);
    match runtime.block_on(orchestrator.run(&spec, &cli.run_id)) {
        Ok(summary) => {
            let state = if summary.succeeded() { "completed" } else { "failed" };
            println!("Run {} state: {state}", cli.run_id);
            if summary.succeeded() {
                codes::SUCCESS
            } else {
                codes::RUN_FAILED
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            codes::RUN_FAILED
        }
    }
}
