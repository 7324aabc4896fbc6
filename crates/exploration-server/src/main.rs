//! Standalone exploration server: accepts one TCP client at a time and
//! bridges it to the built-in protocol core.
//!
//! Usage: exploration-server [--port <n>] [--log-level <level>] [--status-file <path>]

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use exploration_server::config::Cli;
use exploration_server::{
    install_signal_handlers, DemoCore, SessionController, ShutdownFlag, SocketServer, StatusFile,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.filter())
        .parse_default_env()
        .init();

    let shutdown = ShutdownFlag::new();
    install_signal_handlers(&shutdown).context("failed to install signal handlers")?;

    let config = cli.server_config();
    info!("starting server (port={})", config.port);

    let server = SocketServer::open(config.port, config.buffer_capacity)
        .context("could not create socket server")?;

    let core = DemoCore::new(config.buffer_capacity);
    let mut controller = SessionController::new(server, core, shutdown);
    if let Some(path) = cli.status_file {
        controller = controller.with_status_file(StatusFile::new(path, config.port));
    }

    controller.run();
    Ok(())
}
