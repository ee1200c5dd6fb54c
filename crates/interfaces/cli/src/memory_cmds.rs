use anyhow::{Result, bail};
use chrono::Utc;

use mesh_config::AppConfig;
use mesh_memory::MemoryManager;

/// Replay the configured event log into a fresh store.
fn open_memory(config: &AppConfig) -> Result<MemoryManager> {
    if !config.memory.uses_event_log() {
        bail!(
            "memory backend is '{}'; set [memory] backend = \"eventlog\" to inspect persisted memory",
            config.memory.backend
        );
    }
    MemoryManager::with_event_log(config.memory.clone(), &config.memory.event_log_path)
}

pub(crate) fn run_memory_stats(config: &AppConfig) -> Result<()> {
    let memory = open_memory(config)?;
    let stats = memory.stats();
    println!("memory stats");
    println!("- log: {}", config.memory.event_log_path);
    println!("- users: {}", stats.users);
    println!("- turns: {}", stats.turns);
    println!(
        "- learning events: {} ({} unprocessed)",
        stats.learning_events, stats.unprocessed_events
    );
    Ok(())
}

pub(crate) fn run_memory_profile(config: &AppConfig, user: &str) -> Result<()> {
    let memory = open_memory(config)?;
    if memory.user_stats(user).is_none() {
        println!("no memory for user {user}");
        return Ok(());
    }
    let profile = memory.rebuild_profile(user);
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub(crate) fn run_memory_history(config: &AppConfig, user: &str, limit: usize) -> Result<()> {
    let memory = open_memory(config)?;
    let turns = memory.get_history(user, limit);
    if turns.is_empty() {
        println!("no turns for user {user}");
        return Ok(());
    }
    for turn in turns {
        println!(
            "[{}] ({}) {}",
            turn.timestamp.format("%Y-%m-%d %H:%M"),
            turn.topic,
            turn.user_text
        );
        println!("    -> {}", turn.bot_text.replace('\n', "\n       "));
    }
    Ok(())
}

pub(crate) async fn run_memory_cleanup(config: &AppConfig) -> Result<()> {
    let memory = open_memory(config)?;
    let report = memory.cleanup(Utc::now()).await?;
    println!(
        "removed {} turns and {} learning events older than {} days",
        report.turns_removed, report.events_removed, config.memory.retention_days
    );
    Ok(())
}
