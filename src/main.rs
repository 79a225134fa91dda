use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagesmith::{api, config::Config, db};

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(about = "Page composition and versioning server")]
struct Cli {
    /// SQLite database file (overrides PAGESMITH_DATABASE)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API (overrides PAGESMITH_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Apply pending schema migrations and exit
    Migrate,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "pagesmith=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let path = config.database_path()?;
    tracing::info!("Opening database at {}", path.display());
    let db = db::Database::open(path.clone())
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    db.migrate()?;
    Ok(db)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let app = api::create_router_with_config(db, config.security());

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("pagesmith listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(database) = cli.database {
        config.database = Some(database);
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await?;
        }
        Commands::Migrate => {
            open_database(&config)?;
            tracing::info!("Migrations up to date");
        }
    }

    Ok(())
}
