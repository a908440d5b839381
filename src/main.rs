use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use cellmind::core::config::Config;
use cellmind::core::error::EngineError;
use cellmind::core::state::EngineState;
use cellmind::providers::transcript::TranscriptLogger;
use cellmind::providers::{HttpCompletionService, RetryPolicy, RetryingCompletionService};
use cellmind::scheduler::Machine;

#[derive(Parser)]
#[clap(author, version, about = "Grows a tree of LLM-backed cells around an evolving mission")]
struct Cli {
    /// Path to config file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Debug mode
    #[clap(short, long)]
    debug: bool,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the tick loop until Ctrl-C
    Run {
        /// Stop after this many ticks
        #[clap(long)]
        ticks: Option<u64>,
    },
    /// Print the current mission and its history
    Mission,
    /// Replace the mission
    SetMission { text: String },
    /// Restore the mission a history record replaced
    Rollback { index: usize },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(log_level).init();

    if let Err(e) = run(cli).await {
        error!("{:?}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::from_file(path)
    } else {
        warn!("Config file {} not found, using defaults", path);
        Ok(Config::default())
    }
}

fn build_state(config: Config) -> Result<EngineState> {
    let mut http = HttpCompletionService::new(&config.completion)
        .context("Failed to create completion client")?;
    if config.transcript.enabled {
        let logger = TranscriptLogger::new(config.transcript.clone())?;
        http = http.with_transcript(Arc::new(logger));
    }
    let service = RetryingCompletionService::new(http, RetryPolicy::from_config(&config.completion));

    EngineState::load(config, Arc::new(service))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)?;
    if let Some(Command::Run { ticks: Some(ticks) }) = &cli.command {
        config.scheduler.max_ticks = Some(*ticks);
    }

    let mut machine = Machine::new(build_state(config)?);

    match cli.command.unwrap_or(Command::Run { ticks: None }) {
        Command::Run { .. } => {
            let (tx, rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received, finishing the current tick");
                    let _ = tx.send(true);
                }
            });

            info!("Starting with mission: {}", machine.state().mission);
            let ticks = machine.run(rx).await?;
            info!("Stopped after {} ticks", ticks);
        }
        Command::Mission => {
            let state = machine.state();
            println!("Mission: {}", state.mission);
            for (i, record) in state.history.records().iter().enumerate() {
                println!(
                    "\n[{}] {}\n{}",
                    i,
                    record.timestamp.to_rfc3339(),
                    state.history.diff(i).unwrap_or_default()
                );
            }
        }
        Command::SetMission { text } => {
            machine.set_mission(&text)?;
            machine.persist()?;
            println!("Mission: {}", machine.state().mission);
        }
        Command::Rollback { index } => match machine.rollback_mission(index) {
            Ok(restored) => {
                machine.persist()?;
                println!("Mission: {}", restored);
            }
            Err(e) if matches!(
                e.downcast_ref::<EngineError>(),
                Some(EngineError::InvalidRollbackIndex { .. })
            ) =>
            {
                println!("{}", e);
                println!("Mission unchanged: {}", machine.state().mission);
            }
            Err(e) => return Err(e),
        },
    }

    Ok(())
}
