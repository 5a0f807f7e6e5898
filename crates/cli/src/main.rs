use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "rostersync", about = "Multi-provider SIS roster sync", version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "rostersync.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Write a default configuration and create the state database
    Init {
        /// Data directory path
        #[arg(long, default_value = "/var/lib/rostersync")]
        data_dir: String,
    },
    /// Run a sync for every enabled provider, or a single one
    Sync {
        /// Only sync providers of this tenant
        #[arg(long)]
        tenant: Option<String>,
        /// Only sync this provider id
        #[arg(long)]
        provider: Option<String>,
    },
    /// Validate credentials and connectivity of one provider
    TestConnection {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        provider: String,
    },
    /// Show the last run and record counts per provider
    Status,
    /// Drop a provider's token, cursors and known ID sets
    Disconnect {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => {
            commands::init::run(&data_dir).await?;
        }
        Commands::Sync { tenant, provider } => {
            commands::sync::run(&cli.config, tenant.as_deref(), provider.as_deref()).await?;
        }
        Commands::TestConnection { tenant, provider } => {
            commands::test_connection::run(&cli.config, &tenant, &provider).await?;
        }
        Commands::Status => {
            commands::status::run(&cli.config).await?;
        }
        Commands::Disconnect { tenant, provider } => {
            commands::disconnect::run(&cli.config, &tenant, &provider).await?;
        }
    }

    Ok(())
}
