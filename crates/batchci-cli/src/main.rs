//! batchci operator CLI.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::ApiClient;

#[derive(Parser)]
#[command(name = "batchci")]
#[command(about = "Batch CI operator CLI", long_about = None)]
struct Cli {
    /// API server URL
    #[arg(long, env = "BATCHCI_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Operator bearer token
    #[arg(long, env = "BATCHCI_OPERATOR_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the latest commit, or refresh or rebuild a given one
    Build {
        /// Commit to build instead of the latest
        #[arg(long)]
        sha: Option<String>,
        /// Replace a completed build job
        #[arg(long, requires = "sha")]
        rebuild: bool,
    },
    /// Refresh a build from its remote job
    Refresh { sha: String },
    /// Hide a build from the default listing
    Suppress { sha: String },
    /// List builds
    Builds {
        #[arg(long, default_value = "20")]
        limit: u32,
        /// Include suppressed builds
        #[arg(long)]
        all: bool,
    },
    /// Show a build with its latest live test run
    Show { sha: String },
    /// Start a test run against a build
    Test {
        build: String,
        /// Run against live services
        #[arg(long)]
        live: bool,
    },
    /// Refresh a test run from its remote job
    RefreshTest { job: String },
    /// Manage webhook access keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },
    /// Validate a server configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "batchci.kdl")]
        path: String,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// List access keys
    List,
    /// Create an access key
    Create {
        name: String,
        #[arg(long)]
        remark: Option<String>,
    },
    /// Replace both values of an access key
    Rotate { name: String },
    /// Delete an access key
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Validate { path } = &cli.command {
        return commands::validate(path);
    }

    let api = ApiClient::new(&cli.api_url, cli.token)?;
    match cli.command {
        Commands::Build { sha, rebuild } => commands::builds::build(&api, sha, rebuild).await?,
        Commands::Refresh { sha } => {
            commands::builds::action(&api, &sha, commands::builds::REFRESH).await?
        }
        Commands::Suppress { sha } => {
            commands::builds::action(&api, &sha, commands::builds::SUPPRESS).await?
        }
        Commands::Builds { limit, all } => commands::builds::list(&api, limit, all).await?,
        Commands::Show { sha } => commands::builds::show(&api, &sha).await?,
        Commands::Test { build, live } => commands::tests::create(&api, &build, live).await?,
        Commands::RefreshTest { job } => commands::tests::refresh(&api, &job).await?,
        Commands::Keys { command } => match command {
            KeyCommands::List => commands::keys::list(&api).await?,
            KeyCommands::Create { name, remark } => {
                commands::keys::create(&api, &name, remark).await?
            }
            KeyCommands::Rotate { name } => commands::keys::rotate(&api, &name).await?,
            KeyCommands::Delete { name } => commands::keys::delete(&api, &name).await?,
        },
        Commands::Validate { .. } => {}
    }

    Ok(())
}
