use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use studyboard::config::StudyboardToml;
use studyboard::server::{self, ServerConfig};

#[derive(Parser)]
#[command(name = "studyboard")]
#[command(version, about = "Assignment board for students: weighted tasks, deadlines and a calendar")]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "STUDYBOARD_LOG_JSON")]
    pub log_json: bool,

    /// Path to studyboard.toml
    #[arg(long, global = true, default_value = "studyboard.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the JSON API and WebSocket feed
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Dev mode: permissive CORS and sign-in tokens returned in responses
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and exit
    Init {
        /// Database path
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("studyboard=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_ansi(false)).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// File settings, then `STUDYBOARD_*` variables. Flags are applied by the caller.
fn load_settings(path: &std::path::Path) -> Result<StudyboardToml> {
    let mut settings = StudyboardToml::load_or_default(path)?;
    settings
        .apply_env()
        .context("Failed to apply environment overrides")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut settings = load_settings(&cli.config)?;

    match cli.command {
        Commands::Serve {
            port,
            host,
            db_path,
            dev,
        } => {
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(path) = db_path {
                settings.database.path = path;
            }
            if dev {
                settings.server.dev_mode = true;
            }
            server::start_server(ServerConfig::from_toml(settings)).await?;
        }
        Commands::Init { db_path } => {
            let path = db_path.unwrap_or(settings.database.path);
            server::open_database(&path)?;
            println!("Studyboard database initialized at {}", path.display());
        }
    }

    Ok(())
}
