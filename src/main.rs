//! Binary entry point for the `linvol` volume driver.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use linvol::identity::{self, NodeIdentity};
use linvol::mount::mount_path;
use linvol::{
    ConfigError, DriverConfig, LinodeProvider, ProcessCommandRunner, SystemTools, ToolPaths,
    VolumeDriver, VolumeError, capabilities,
};

mod cli;

use cli::{Cli, CreateCommand};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "LINVOL_LOG";

type Driver = VolumeDriver<LinodeProvider, SystemTools<ProcessCommandRunner>>;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Volume(#[from] VolumeError),
    #[error("failed to write output: {0}")]
    Output(String),
}

#[derive(Debug, Serialize)]
struct MountpointOutput<'a> {
    mountpoint: &'a str,
}

#[derive(Debug, Serialize)]
struct IdentityOutput<'a> {
    node_id: &'a str,
    label: &'a str,
    region: &'a str,
}

impl<'a> IdentityOutput<'a> {
    fn new(identity: &'a NodeIdentity) -> Self {
        Self {
            node_id: identity.node_id.as_str(),
            label: &identity.label,
            region: &identity.region,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Capabilities => emit(&capabilities()),
        Cli::Path(args) => {
            let settings = DriverConfig::load_without_cli_args()?.driver_settings()?;
            let path = mount_path(&settings.mount_root, &args.name)?;
            emit(&MountpointOutput {
                mountpoint: path.as_str(),
            })
        }
        Cli::Whoami => {
            let driver = connect().await?;
            emit(&IdentityOutput::new(driver.identity()))
        }
        Cli::Create(CreateCommand { name, options }) => {
            let options: BTreeMap<String, String> = options.into_iter().collect();
            let info = connect().await?.create(&name, &options).await?;
            emit(&info)
        }
        Cli::Remove(args) => {
            connect().await?.remove(&args.name).await?;
            Ok(())
        }
        Cli::Mount(args) => {
            let path = connect().await?.mount(&args.name).await?;
            emit(&MountpointOutput {
                mountpoint: path.as_str(),
            })
        }
        Cli::Unmount(args) => {
            connect().await?.unmount(&args.name).await?;
            Ok(())
        }
        Cli::Get(args) => emit(&connect().await?.get(&args.name).await?),
        Cli::List => emit(&connect().await?.list().await?),
    }
}

/// Loads configuration, resolves this node and wires the driver.
async fn connect() -> Result<Driver, CliError> {
    let config = DriverConfig::load_without_cli_args()?;
    let settings = config.driver_settings()?;
    let token = config.require_token()?;
    let provider =
        LinodeProvider::new(config.api_url.trim(), token).map_err(VolumeError::from)?;

    let label = identity::local_label(config.node_label.as_deref())?;
    let addresses = identity::link_local_addresses()?;
    let node = NodeIdentity::resolve(&provider, &label, &addresses, config.region.as_deref()).await?;
    debug!(node_id = %node.node_id, region = %node.region, "resolved node identity");

    let tools = SystemTools::new(ToolPaths::from(&config), ProcessCommandRunner);
    Ok(VolumeDriver::new(provider, tools, node, settings))
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    write_json(io::stdout(), value)
}

fn write_json<T: Serialize + ?Sized>(mut target: impl Write, value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
