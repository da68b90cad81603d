use anyhow::Result;
use clap::{Parser, Subcommand};
use salvager_config::GatewayConfig;
use salvager_core::{Page, SalvagerError};
use salvager_gateway::ResourceGateway;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "salvager")]
#[command(about = "Gather data from Apify actors over MCP sessions, with REST fallback", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.salvager/config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the actor store
    Discover {
        query: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one actor, including its input schema when available
    Details { actor_id: String },

    /// Start a run of an actor
    Gather {
        actor_id: String,

        /// Run input as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },

    /// Show the status of a run
    Status { run_id: String },

    /// Fetch a run's output once it has completed
    Output {
        run_id: String,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        #[arg(short, long, default_value_t = 0)]
        offset: usize,
    },

    /// Print the log of a run
    Logs { run_id: String },

    /// List stored datasets
    Datasets,

    /// Show a dataset, or page through its items
    Dataset {
        dataset_id: String,

        #[arg(long, action = clap::ArgAction::SetTrue)]
        items: bool,

        #[arg(short, long, default_value_t = 100)]
        limit: usize,

        #[arg(short, long, default_value_t = 0)]
        offset: usize,
    },

    /// Search the web and gather the results with the RAG web browser
    Browse {
        query: String,

        #[arg(short, long)]
        max_results: Option<usize>,
    },

    /// List the MCP tools the platform exposes
    Tools,

    /// Call an MCP tool directly
    Call {
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = load_config(cli.config)?;
    let gateway = ResourceGateway::from_config(&config)?;
    gateway.start();

    let outcome = run(&gateway, cli.command).await;
    gateway.shutdown().await;

    let code = match outcome {
        Ok(output) => {
            print_json(&output)?;
            ExitCode::SUCCESS
        }
        Err(e) => {
            debug!("Command failed: {:?}", e);
            print_json(&json!({ "error": e.kind(), "message": e.to_string() }))?;
            match e {
                SalvagerError::NotConfigured(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    };

    Ok(code)
}

async fn run(gateway: &ResourceGateway, command: Commands) -> salvager_core::Result<Value> {
    if !gateway.is_configured() {
        return Err(SalvagerError::NotConfigured(
            "set the platform API token in the environment to use the gateway".to_string(),
        ));
    }

    let output = match command {
        Commands::Discover { query, limit } => {
            serde_json::to_value(gateway.discover_resources(&query, limit).await?)?
        }
        Commands::Details { actor_id } => {
            serde_json::to_value(gateway.get_resource_details(&actor_id).await?)?
        }
        Commands::Gather { actor_id, input } => {
            let input: Value = serde_json::from_str(&input)?;
            serde_json::to_value(gateway.start_gathering(&actor_id, input).await?)?
        }
        Commands::Status { run_id } => serde_json::to_value(gateway.get_task_status(&run_id).await?)?,
        Commands::Output { run_id, limit, offset } => {
            let output = gateway.collect_run_output(&run_id, Page::new(limit, offset)).await?;
            serde_json::to_value(output)?
        }
        Commands::Logs { run_id } => Value::String(gateway.get_task_logs(&run_id).await?),
        Commands::Datasets => Value::Array(gateway.list_stored_resources().await?),
        Commands::Dataset { dataset_id, items, limit, offset } => {
            if items {
                Value::Array(gateway.get_task_output(&dataset_id, Page::new(limit, offset)).await?)
            } else {
                gateway.get_stored_resource(&dataset_id).await?
            }
        }
        Commands::Browse { query, max_results } => {
            serde_json::to_value(gateway.browse_and_gather(&query, max_results).await?)?
        }
        Commands::Tools => serde_json::to_value(gateway.list_tools().await?)?,
        Commands::Call { tool, args } => {
            let args: Value = serde_json::from_str(&args)?;
            serde_json::to_value(gateway.call_tool(&tool, args).await?)?
        }
    };

    Ok(output)
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let path = path.or_else(|| Some(GatewayConfig::default_config_path()).filter(|p| p.exists()));

    let config = match path {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            GatewayConfig::from_yaml(&path)?
        }
        None => {
            info!("Using default configuration");
            GatewayConfig::default()
        }
    };
    Ok(config)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose { "debug" } else { "info" };

    // stdout carries the JSON result; logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
