use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use treewatch::{AsyncSubscription, SessionOutcome, Settings, WatchSession, WatchSignal};

#[derive(Parser)]
#[command(name = "treewatch")]
#[command(about = "Watch a directory tree and print every change", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Watch a directory until it disappears or Ctrl-C is pressed
    Watch {
        /// Directory to watch
        root: PathBuf,

        /// Watch subdirectories too (overrides config)
        #[arg(short, long, conflicts_with = "flat")]
        recursive: bool,

        /// Watch only the root directory (overrides config)
        #[arg(long)]
        flat: bool,

        /// Use the polling backend with this interval in milliseconds
        #[arg(long, value_name = "MS")]
        poll: Option<u64>,

        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });
    treewatch::logging::init_with_config(&config.logging);

    let result = match cli.command {
        Commands::Init { force } => init(force),
        Commands::Config => show_config(&config),
        Commands::Watch {
            root,
            recursive,
            flat,
            poll,
            json,
        } => {
            let mut watch = config.watch.clone();
            if recursive {
                watch.recursive = true;
            }
            if flat {
                watch.recursive = false;
            }
            let backend = match poll {
                Some(ms) => treewatch::Backend::Poll {
                    interval: Duration::from_millis(ms),
                },
                None => watch.backend(),
            };
            run_watch(root, watch.recursive, backend, json).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init(force: bool) -> anyhow::Result<ExitCode> {
    let path = Settings::init_config_file(force)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("could not create configuration file")?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(ExitCode::SUCCESS)
}

fn show_config(config: &Settings) -> anyhow::Result<ExitCode> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{}", toml::to_string_pretty(config)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_watch(
    root: PathBuf,
    recursive: bool,
    backend: treewatch::Backend,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let session = WatchSession::builder()
        .root(&root)
        .recursive(recursive)
        .backend(backend)
        .build()
        .with_context(|| format!("could not watch {}", root.display()))?;

    tracing::info!(
        "[cli] watching {} ({})",
        root.display(),
        if recursive { "recursive" } else { "flat" }
    );

    let mut subscription = AsyncSubscription::spawn(session);

    loop {
        tokio::select! {
            signal = subscription.recv() => match signal {
                Some(signal) => print_signal(&signal, json),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[cli] interrupted");
                break;
            }
        }
    }

    let outcome = subscription.cancel().await;
    tracing::debug!("[cli] session ended: {outcome:?}");

    Ok(match outcome {
        SessionOutcome::Failed => ExitCode::FAILURE,
        SessionOutcome::Completed | SessionOutcome::Cancelled => ExitCode::SUCCESS,
    })
}

fn print_signal(signal: &WatchSignal, json: bool) {
    match (signal, json) {
        (WatchSignal::Event(event), true) => println!("{}", json!({ "event": event })),
        (WatchSignal::Event(event), false) => println!("{event}"),
        (WatchSignal::Warning(error), true) => {
            println!("{}", json!({ "warning": error.to_string() }))
        }
        (WatchSignal::Warning(error), false) => eprintln!("Warning: {error}"),
        (WatchSignal::Error(error), true) => println!("{}", json!({ "error": error.to_string() })),
        (WatchSignal::Error(error), false) => eprintln!("Error: {error}"),
        (WatchSignal::Complete, true) => println!("{}", json!({ "complete": true })),
        (WatchSignal::Complete, false) => eprintln!("Watch set empty, nothing left to observe"),
    }
}
