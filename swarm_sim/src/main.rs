//! Swarm Simulator CLI
//!
//! Run the canned scenarios against the kernel, deterministically per seed.

use clap::Parser;
use std::process::ExitCode;
use swarm_sim::{ScenarioId, ScenarioResult, ScenarioRunner, SimConfig};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Swarm deterministic simulation CLI
#[derive(Parser, Debug)]
#[command(name = "swarm-sim")]
#[command(about = "Run deterministic robotic-bee scenarios", long_about = None)]
struct Args {
    /// Master seed (0 = random from time); defaults to the config file's
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of bees; defaults to the config file's
    #[arg(short, long)]
    bees: Option<usize>,

    /// Scenario to run (chatter, forage, ns_relay, backpressure, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulated duration in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frames of a single scenario to this JSON file
    #[arg(long)]
    export: Option<String>,

    /// Base configuration as JSON; missing fields keep their defaults
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        EnvFilter::new(level.as_str())
    });
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        eprintln!("Warning: tracing subscriber already set");
    }
}

fn random_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED in {} events",
            result.scenario.name(),
            result.seed,
            result.metrics.dispatched
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => match SimConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: cannot load {}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => SimConfig::default(),
    };
    if let Some(bees) = args.bees {
        config.num_bees = bees;
    }
    if let Some(duration) = args.duration {
        config.max_duration_secs = duration;
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: chatter, forage, ns_relay, backpressure, all");
                return ExitCode::FAILURE;
            }
        }
    };

    let base_seed = match args.seed.unwrap_or(config.seed) {
        0 => random_seed(),
        seed => seed,
    };

    if !args.json {
        info!("Swarm Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            return ExitCode::FAILURE;
        }

        let runner = ScenarioRunner::with_config(SimConfig { seed: base_seed, ..config });
        let (result, export) = runner.run_with_export(scenarios[0]);
        match export.write_to_file(export_path) {
            Ok(()) => info!("Exported {} frames to {}", export.frames.len(), export_path),
            Err(e) => {
                error!("Failed to write export: {}", e);
                return ExitCode::FAILURE;
            }
        }
        report(&result);
        return if result.passed { ExitCode::SUCCESS } else { ExitCode::FAILURE };
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::with_config(SimConfig { seed, ..config.clone() });

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("All {} scenario runs passed", total);
        } else {
            error!("{}/{} scenario runs failed", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
