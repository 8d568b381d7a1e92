// src/main.rs - interactive rotation host on stdin
use std::path::PathBuf;

use clap::Parser;
use swivel_rs::host::{HostError, HostReply, RotationHost, demo_vessel, parse_command};
use swivel_rs::{Config, load_config};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "swivel-host", about = "Interactive joint rotation host")]
struct Args {
    /// Configuration TOML; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Restore a saved vessel before accepting commands
    #[arg(short, long)]
    load: Option<PathBuf>,
    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(&path.to_string_lossy()).map_err(|e| {
                tracing::error!("Failed to load config from '{}': {}", path.display(), e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
            })?
        }
        None => Config::default(),
    };
    if args.print_config {
        print!("{}", toml::to_string(&config)?);
        return Ok(());
    }

    let vessel = demo_vessel(config)?;
    let (handle, task) = RotationHost::new(vessel).spawn();
    if let Some(path) = &args.load {
        let report = handle.load(path.clone()).await?;
        tracing::info!("Loaded {} ({} rotators notified)", path.display(), report.notified);
    }

    tracing::info!("swivel-host ready, type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match parse_command(&line) {
            Ok(command) => handle.execute(command).await,
            Err(e) => Err(e),
        };
        match reply {
            Ok(HostReply::Help { text }) => println!("{}", text),
            Ok(HostReply::Quit) => break,
            Ok(reply) => println!("{}", serde_json::to_string(&reply)?),
            Err(HostError::Closed) => break,
            Err(e) => eprintln!("error: {}", e),
        }
    }

    handle.shutdown();
    let vessel = task.await?;
    tracing::info!("Stopped at tick {}", vessel.tick());
    Ok(())
}
