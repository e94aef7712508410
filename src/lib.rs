pub mod db;
pub mod events;
pub mod session;
pub mod settings;
pub mod sink;
pub mod surface;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use db::Database;
use events::EventBus;
use log::{info, warn};
use session::{
    commands::{run_command, Command, Reply, HELP},
    GameProfile, SessionController,
};
use settings::SettingsStore;
use sink::{CurrentUser, HttpRewardSink};
use surface::NullSurface;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let Some(game) = std::env::args().nth(1) else {
        let games: Vec<&str> = GameProfile::ALL.iter().map(|p| p.as_str()).collect();
        anyhow::bail!("usage: arcade-rewards <game>  (one of: {})", games.join(", "));
    };
    let profile = GameProfile::parse(&game)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(serve(profile))
}

async fn serve(profile: GameProfile) -> Result<()> {
    let data_dir = SettingsStore::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let database = Database::new(data_dir.join("arcade-rewards.sqlite3"))?;

    // Sessions still open here were lost to a crash before they could flush.
    recover_incomplete_sessions(&database).await?;

    let config = settings.reward_config(profile);
    let sink = HttpRewardSink::new(&settings.reward_sink_url(), settings.request_timeout())?;
    let user = settings.user_id().map(CurrentUser::new);
    if user.is_none() {
        info!("No userId configured; playing as guest (rewards are not credited)");
    }

    let events = EventBus::new();
    tokio::spawn(print_events(events.clone()));

    let controller = SessionController::new(
        config,
        user,
        Arc::new(sink),
        Arc::new(NullSurface),
        events,
    )?
    .with_ledger(database.clone());

    info!(
        "arcade-rewards ready for {} (sink {})",
        profile.as_str(),
        settings.reward_sink_url()
    );
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("error: {err}");
                continue;
            }
        };

        match run_command(&controller, Some(&database), Some(&settings), command).await {
            Ok(Reply::Quit) => break,
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Snapshot(snapshot)) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            Err(err) => println!("error: {err}"),
        }
    }

    controller.shutdown().await;
    Ok(())
}

async fn recover_incomplete_sessions(database: &Database) -> Result<()> {
    let now = Utc::now();
    for session in database.get_incomplete_sessions().await? {
        warn!(
            "Recovered incomplete session {} ({} points never flushed); marking as Interrupted",
            session.id, session.pending_reward
        );
        database.mark_session_interrupted(&session.id, now).await?;
    }
    Ok(())
}

async fn print_events(events: EventBus) {
    let mut receiver = events.subscribe();
    loop {
        match receiver.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!("Failed to serialize {} event: {err}", event.name()),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event printer skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
