//! neurobridge binary entry point

use std::process;

use clap::Parser;
use tracing::{error, info};

use neurobridge::cli::{Cli, Commands, ConfigAction};
use neurobridge::config::NodeConfig;
use neurobridge::error::{Error, Result};
use neurobridge::logging;
use neurobridge::node::CommNode;
use neurobridge::registry::AddressRegistry;
use neurobridge::role::Role;
use neurobridge::rpc::client::{connect_to_end, RpcClient};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = NodeConfig::load(cli.config.as_deref())?;
    let _guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    match cli.command {
        Commands::Run { role } => run_node(role, config).await,
        Commands::Exec {
            end,
            command,
            no_wait,
        } => exec_command(end, &command, no_wait, config).await,
        Commands::Stop { end } => stop_end(end, config).await,
        Commands::Config { action } => handle_config(action, config),
    }
}

/// Run a node until Ctrl-C, then stop it cleanly
async fn run_node(role: Role, config: NodeConfig) -> Result<()> {
    let mut node = CommNode::builder(role).config(config).start().await?;

    if let Some(address) = node.server_address() {
        info!(role = %role, address = %address, "Serving; press Ctrl-C to stop");
    } else {
        info!(role = %role, "Control node up; press Ctrl-C to stop");
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    node.stop().await;
    Ok(())
}

/// Connect to a serving end for a one-shot control command
async fn control_client(end: Role, config: &NodeConfig) -> Result<RpcClient> {
    let registry = AddressRegistry::new(config.registry.dir.clone().map(Into::into));

    connect_to_end(end, config, &registry, true)
        .await
        .ok_or_else(|| Error::Connection {
            addr: end.to_string(),
            message: "end is not reachable; is its node running?".to_string(),
        })
}

async fn exec_command(end: Role, command: &str, no_wait: bool, config: NodeConfig) -> Result<()> {
    let client = control_client(end, &config).await?;

    if no_wait {
        let task_id = client.enqueue_command(command).await?;
        println!("{task_id}");
    } else {
        let value = client.run_command(command).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    }

    Ok(())
}

async fn stop_end(end: Role, config: NodeConfig) -> Result<()> {
    let client = control_client(end, &config).await?;
    client.stop().await?;
    info!(end = %end, "Stop requested");
    Ok(())
}

fn handle_config(action: ConfigAction, config: NodeConfig) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", config.to_toml()?);
        }
        ConfigAction::Init { path } => {
            if path.exists() {
                return Err(Error::ConfigValidation(format!(
                    "Refusing to overwrite existing file '{}'",
                    path.display()
                )));
            }
            std::fs::write(&path, NodeConfig::default().to_toml()?)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
