use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use serial_link::{
    cli,
    client::{HexFrame, LinkClient},
    config::Config,
    logging,
    registry::PortRegistry,
    transport::serial::SerialConnector,
};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use tracing::{debug, error, info};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    signal(SignalKind::hangup())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    std::future::pending().await
}

fn open_links(config: &Config, registry: &PortRegistry) -> Result<()> {
    for link_config in &config.links {
        let link = Arc::new(LinkClient::new(link_config.options(), SerialConnector));

        for command in &link_config.poll_commands {
            link.add_poll_command(command.clone());
        }

        let address = link_config.address.clone();
        link.set_receive_callback(move |bytes| {
            info!(%address, "Receive: {}", HexFrame(bytes));
        });

        match link.start() {
            Ok(()) => registry.add(link)?,
            Err(e) => error!(address = %link_config.address, %e, "Could not start link"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command)?;

        return Ok(());
    }

    logging::init(cli.log_level, cli.log_dir.map(|dir| (cli.log_level, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    config.validate()?;

    let registry = PortRegistry::new();
    open_links(&config, &registry)?;
    info!(links = ?registry.addresses(), "Running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
    }

    registry.close_all().await;

    Ok(())
}
