use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use csv::Writer;
use tracing::{error, info};

mod scenario;
mod simulator;

use scenario::{Scenario, ScenarioError};
use simulator::Simulator;

#[derive(Parser, Debug)]
#[command(name = "swivel_simulator", about = "Deterministic joint rotation scenario runner")]
struct Args {
    /// Scenario TOML file
    scenario: PathBuf,
    /// Number of fixed ticks to run; defaults to the scenario's `ticks`
    #[arg(short, long)]
    ticks: Option<u64>,
    /// Directory receiving results.csv and results.jsonl
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,
    /// Skip the JSONL output
    #[arg(long)]
    no_jsonl: bool,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn run(args: &Args) -> Result<(), ScenarioError> {
    let scenario = Scenario::load(&args.scenario)?;
    let ticks = args.ticks.unwrap_or(scenario.ticks);
    info!("Loaded scenario '{}' ({} ticks)", scenario.name, ticks);

    std::fs::create_dir_all(&args.output_dir)?;
    let mut wtr = Writer::from_path(args.output_dir.join("results.csv"))?;
    let mut jsonl = if args.no_jsonl {
        None
    } else {
        Some(File::create(args.output_dir.join("results.jsonl"))?)
    };

    let mut sim = Simulator::new(&scenario)?;
    let summary = sim
        .run(ticks, |record| {
            wtr.serialize(record)?;
            if let Some(file) = jsonl.as_mut() {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            Ok(())
        })?
        .clone();
    wtr.flush()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    if let Err(e) = run(&args) {
        error!("Simulation failed: {}", e);
        std::process::exit(1);
    }
}
