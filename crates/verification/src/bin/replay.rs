//! NSS scenario replay
//!
//! Replays one or more YAML frame scenarios against the recording backend and
//! prints the jobs every frame scheduled.
//!
//! # Usage
//! ```bash
//! replay scenarios/padded_2x.yaml --jobs --log-level debug
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use nss_verification::{Scenario, ScenarioReport};

/// Command-line arguments for the scenario replayer
#[derive(Parser)]
#[command(version, about = "Replays NSS frame scenarios against a recording backend")]
struct Args {
    /// Scenario files to replay
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, short, default_value = "warn")]
    log_level: String,

    /// Print the job list of every frame
    #[arg(long, short)]
    jobs: bool,
}

fn print_report(report: &ScenarioReport, show_jobs: bool) {
    println!(
        "  padded {} -> {}, padding pass: {}, precision: {}, permutation: {:?}",
        report.padded_input,
        report.padded_output,
        report.has_padding_pass,
        report.precision.name(),
        report.permutation
    );
    for (index, frame) in report.frames.iter().enumerate() {
        match &frame.result {
            Ok(()) => println!(
                "  ✓ frame {index} (slot {}, jitter {:+.4}, {:+.4}): {} jobs",
                frame.frame_index,
                frame.jitter.x,
                frame.jitter.y,
                frame.jobs.len()
            ),
            Err(error) => println!("  ✗ frame {index} (slot {}): {error} [{:#x}]", frame.frame_index, error.code()),
        }
        if show_jobs && !frame.jobs.is_empty() {
            println!("      {}", frame.jobs.join(" → "));
        }
    }
    for (severity, message) in &report.messages {
        println!("  {severity:?}: {message}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = tracing::Level::from_str(&args.log_level).map_err(|e| format!("Invalid log level '{}': {e}", args.log_level))?;
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut failed = 0;
    for path in &args.scenarios {
        let scenario = Scenario::from_file(path).map_err(|e| format!("{}: {e}", path.display()))?;
        println!("Scenario: {} ({})", scenario.name, path.display());
        if !scenario.description.is_empty() {
            println!("  {}", scenario.description);
        }

        match scenario.run() {
            Ok(report) => {
                print_report(&report, args.jobs);
                if !report.clean {
                    println!("  ✗ resources outlived the context");
                    failed += 1;
                }
            }
            Err(e) => {
                println!("  ✗ {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} scenario(s) failed").into());
    }
    Ok(())
}
