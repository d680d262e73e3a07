//! Architecture sandbox CLI
//!
//! Run simulation scenarios, validate a saved design, list problems.

use archsim_core::problem;
use archsim_core::{validate, ArchitectureGraph, CanvasSnapshot};
use archsim_sim::scenarios::ScenarioId;
use archsim_sim::{ScenarioResult, ScenarioRunner};
use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Architecture sandbox simulator CLI
#[derive(Parser, Debug)]
#[command(name = "archsim")]
#[command(about = "Simulate and validate system designs", long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run simulation scenarios
    Run {
        /// Master seed for determinism (0 = random from time)
        #[arg(short, long, default_value = "42")]
        seed: u64,

        /// Scenario to run (overload, idle, crash, reference, fix_loop,
        /// traffic_spike, partition, miss_storm, slowdown, chaos_storm, chaos, all)
        #[arg(short = 'S', long, default_value = "all")]
        scenario: String,

        /// Number of consecutive seeds to test (for CI mode)
        #[arg(long, default_value = "1")]
        seeds: usize,

        /// Minimum simulation duration in seconds
        #[arg(short, long, default_value = "30")]
        duration: f64,

        /// Tick rate in Hz
        #[arg(long, default_value = "10")]
        tick_rate: u32,

        /// JSON output for CI parsing
        #[arg(long)]
        json: bool,

        /// Export sampled frames of a single scenario to a JSON file
        #[arg(long)]
        export: Option<String>,
    },

    /// Score a saved design against a problem
    Validate {
        /// Problem id (see `archsim problems`)
        #[arg(short, long, default_value = "url_shortener")]
        problem: String,

        /// Design file: a canvas snapshot or a bare graph, as JSON
        design: String,

        /// JSON output
        #[arg(long)]
        json: bool,
    },

    /// List the built-in problems
    Problems,
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let code = match args.command {
        Command::Run {
            seed,
            scenario,
            seeds,
            duration,
            tick_rate,
            json,
            export,
        } => run_scenarios(seed, &scenario, seeds, duration, tick_rate, json, export.as_deref()),
        Command::Validate {
            problem,
            design,
            json,
        } => validate_design(&problem, &design, json),
        Command::Problems => list_problems(),
    };

    // Exit with proper code for CI
    if code != 0 {
        std::process::exit(code);
    }
}

fn run_scenarios(
    seed: u64,
    scenario: &str,
    seeds: usize,
    duration: f64,
    tick_rate: u32,
    json: bool,
    export: Option<&str>,
) -> i32 {
    if !json {
        info!("Architecture sandbox simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = match scenario {
        "all" => ScenarioId::all(),
        "standard" => ScenarioId::standard(),
        "chaos" => ScenarioId::chaos(),
        name => match name.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, standard, chaos, all", names.join(", "));
                return 1;
            }
        },
    };

    // Determine base seed
    let base_seed = if seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        seed
    };

    let base = match ScenarioRunner::new(base_seed).with_duration(duration) {
        Ok(runner) => runner.with_tick_rate(tick_rate),
        Err(e) => {
            eprintln!("Error: invalid duration {}: {}", duration, e);
            return 1;
        }
    };

    // Handle --export mode
    if let Some(export_path) = export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario");
            return 1;
        }
        // One frame per simulated second
        let (result, export) = base.run_with_export(scenarios[0], u64::from(tick_rate.max(1)));

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
            return 1;
        }
        info!("Exported {} frames to {}", export.frames.len(), export_path);
        report(&result, json);
        return if result.passed { 0 } else { 1 };
    }

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = base.clone().with_seed(seed);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !json {
                report(&result, false);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results,
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if failed_count > 0 {
        1
    } else {
        0
    }
}

fn report(result: &ScenarioResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
        return;
    }
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED in {} ticks, peak util {:.2}",
            result.scenario.name(),
            result.seed,
            result.total_ticks,
            result.metrics.peak_utilization
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

/// Reads a canvas snapshot, falling back to a bare graph.
fn load_design(path: &str) -> Result<ArchitectureGraph, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    match CanvasSnapshot::from_json(&text) {
        Ok(snapshot) => Ok(snapshot.graph),
        Err(_) => Ok(serde_json::from_str(&text)?),
    }
}

fn validate_design(problem_id: &str, path: &str, json: bool) -> i32 {
    let Some(problem) = problem::find(problem_id) else {
        eprintln!("Error: unknown problem '{}'", problem_id);
        return 1;
    };
    let graph = match load_design(path) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Error reading {}: {}", path, e);
            return 1;
        }
    };

    let result = validate(&graph, &problem);
    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return 1;
            }
        }
    } else {
        info!("{} against {}", path, problem.title);
        result.print();
    }

    if result.is_valid {
        0
    } else {
        1
    }
}

fn list_problems() -> i32 {
    for p in problem::catalogue() {
        println!(
            "{:<16} {:<20} {:?}  {:>8.0} rps peak  ${:.0}/month",
            p.id,
            p.title,
            p.difficulty,
            p.peak_rps(),
            p.constraints.monthly_budget
        );
    }
    0
}
