mod memory_cmds;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use mesh_config::AppConfig;
use mesh_runtime::MeshBot;

const CONFIG_PATH: &str = "config/default.toml";
/// Log level used when the configuration cannot be read.
const FALLBACK_LOG_LEVEL: &str = "info";

#[derive(Debug, Parser)]
#[command(
    name = "mesh",
    version,
    about = "MESH, the BPO finance assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP service (default).
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one message through the bot and print the reply.
    Ask {
        #[arg(long, default_value = "cli-user")]
        user: String,
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Print the effective configuration and provider status.
    Doctor,
    /// Inspect or prune the persisted memory event log.
    Memory {
        #[command(subcommand)]
        command: MemoryCommands,
    },
    /// Write the effective configuration to config/default.toml.
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum MemoryCommands {
    Stats,
    Profile {
        user: String,
    },
    History {
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Drop turns and learning events older than the retention window.
    Cleanup,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let loaded = AppConfig::load_from(CONFIG_PATH);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(&loaded)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let result = match loaded {
        Ok(config) => run(cli, config).await,
        Err(err) => Err(err.context(format!("failed to load {CONFIG_PATH}"))),
    };
    if let Err(err) = result {
        let message = format!("{err:#}");
        error!(error = %message, "mesh exited with an error");
        std::process::exit(1);
    }
}

/// Configured log level, or the fallback when the configuration is unusable
/// so the load error itself still gets logged.
fn log_level(loaded: &Result<AppConfig>) -> &str {
    loaded
        .as_ref()
        .map(|config| config.telemetry.log_level.as_str())
        .unwrap_or(FALLBACK_LOG_LEVEL)
}

async fn run(cli: Cli, mut config: AppConfig) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            mesh_runtime::run_server(config).await?;
        }
        Commands::Ask { user, text } => {
            let bot = MeshBot::from_config(config)?;
            let reply = bot
                .handle_message(&user, &text.join(" "), "cli", &CancellationToken::new())
                .await;
            println!("{}", reply.text);
            match (&reply.skill, &reply.provider) {
                (Some(skill), _) => eprintln!("[skill: {skill}]"),
                (None, Some(provider)) => eprintln!("[provider: {provider}]"),
                (None, None) => eprintln!("[{:?}]", reply.source),
            }
        }
        Commands::Doctor => {
            println!("{} doctor", config.bot.name.to_lowercase());
            println!("- config file: {CONFIG_PATH} (exists: {})", Path::new(CONFIG_PATH).exists());
            println!("- listen: {}:{}", config.server.host, config.server.port);
            println!("- memory backend: {}", config.memory.backend);
            if config.memory.uses_event_log() {
                println!("- memory log path: {}", config.memory.event_log_path);
            }
            println!("- retention: {} days", config.memory.retention_days);
            println!("- timezone: {}", config.memory.timezone);
            for (provider, configured) in config.provider_summary() {
                println!(
                    "- provider {provider}: {}",
                    if configured { "configured" } else { "missing credentials" }
                );
            }
        }
        Commands::Memory { command } => match command {
            MemoryCommands::Stats => memory_cmds::run_memory_stats(&config)?,
            MemoryCommands::Profile { user } => memory_cmds::run_memory_profile(&config, &user)?,
            MemoryCommands::History { user, limit } => {
                memory_cmds::run_memory_history(&config, &user, limit.max(1))?
            }
            MemoryCommands::Cleanup => memory_cmds::run_memory_cleanup(&config).await?,
        },
        Commands::InitConfig { force } => {
            if Path::new(CONFIG_PATH).exists() && !force {
                anyhow::bail!("{CONFIG_PATH} already exists (pass --force to overwrite)");
            }
            config.save_to(CONFIG_PATH)?;
            println!("wrote {CONFIG_PATH}");
        }
    }

    Ok(())
}
