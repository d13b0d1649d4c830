mod cancel;
mod cli;
mod config;
mod engine;
mod error;
mod fetch;
mod output;
mod partial;
mod progress;
mod retry;
mod session;
mod target;
mod ui;

use anyhow::Result;
use clap::Parser;
use console::Style;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::GarimpoConfig;
use engine::{SessionEngine, SessionVerdict};
use fetch::FeedClient;
use session::{CheckpointError, CheckpointStore, derive_session_id};
use target::ProfileTarget;
use ui::ExtractionProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = GarimpoConfig::load()?;
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }

    match cli.command {
        Command::Extract {
            profile_url,
            output,
            fresh,
            max_posts,
            no_pacing,
        } => {
            if let Some(cap) = max_posts {
                config.max_posts = Some(cap);
            }
            if no_pacing {
                config.pacing_ms = 0;
            }
            run_extract(config, &profile_url, &output, fresh).await
        }
        Command::Sessions => list_sessions(&config),
        Command::Status {
            profile_url,
            output,
        } => show_status(&config, &profile_url, &output),
        Command::Clean { days } => clean(&config, days),
    }
}

async fn run_extract(
    config: GarimpoConfig,
    profile_url: &str,
    output: &str,
    fresh: bool,
) -> Result<()> {
    let target = ProfileTarget::parse(profile_url)?;
    let client = FeedClient::for_profile(&config.feed_base_url, &target);
    let store = CheckpointStore::new(&config.checkpoint_dir)?;
    let mut engine = SessionEngine::new(config, store);

    // Ctrl-C vira um pedido de parada cooperativo.
    let cancel = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.request_stop();
        }
    });

    let progress = ExtractionProgress::start(&target.handle);
    let observer = progress.spawn_observer(engine.progress(), engine.cancel_flag());

    let report = engine.run(&client, &target.url, output, fresh).await?;

    observer.abort();
    progress.complete(&report);

    if let Some(result) = &report.result
        && (!result.items.is_empty() || result.is_degraded())
    {
        let path = output::write_document(
            result,
            &target.url,
            &target.handle,
            std::path::Path::new(output),
        )?;
        println!("  Document: {}", path.display());
    }

    if matches!(report.verdict, SessionVerdict::Failed { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

fn list_sessions(config: &GarimpoConfig) -> Result<()> {
    let store = CheckpointStore::new(&config.checkpoint_dir)?;
    let sessions = store.list_sessions()?;
    if sessions.is_empty() {
        println!("No recorded sessions.");
        return Ok(());
    }

    let dim = Style::new().dim();
    for state in sessions {
        println!(
            "{}  {:<11}  {:>5} posts  {}",
            state.session_id,
            state.status.to_string(),
            state.collected_count,
            dim.apply_to(format!(
                "{}  (last checkpoint {})",
                state.target,
                state.last_checkpoint_at.format("%Y-%m-%d %H:%M UTC")
            ))
        );
    }
    Ok(())
}

fn show_status(config: &GarimpoConfig, profile_url: &str, output: &str) -> Result<()> {
    let target = ProfileTarget::parse(profile_url)?;
    let store = CheckpointStore::new(&config.checkpoint_dir)?;
    let session_id = derive_session_id(&target.url, output);

    match store.load(&session_id) {
        Ok(state) => {
            println!("Session {session_id}");
            println!("  status:     {}", state.status);
            println!("  collected:  {} posts", state.collected_count);
            println!("  attempted:  {}", state.attempted_count);
            println!("  errors:     {}", state.error_count);
            println!("  cursor:     {}", state.cursor);
            println!("  started:    {}", state.started_at.format("%Y-%m-%d %H:%M UTC"));
            println!(
                "  checkpoint: {}",
                state.last_checkpoint_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        Err(CheckpointError::NotFound(_)) => {
            println!("No checkpoint for this profile and output.");
        }
        Err(CheckpointError::Corrupt(_, reason)) => {
            println!("Checkpoint exists but is corrupt: {reason}");
            println!("A new run will start fresh.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn clean(config: &GarimpoConfig, days: u64) -> Result<()> {
    let store = CheckpointStore::new(&config.checkpoint_dir)?;
    let removed = store.sweep_older_than(days)?;
    println!("Removed {removed} session record(s) older than {days} day(s).");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "garimpo=debug" } else { "garimpo=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
