use std::env;
use std::net::UdpSocket;
use std::path::Path;
use std::sync::Arc;

use duet::{Config, EchoModel, OscClient, listen, spawn_session};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // usage: duet [config.ron]
    let config = match env::args().nth(1) {
        Some(path) => Config::load(Path::new(&path))?,
        None => Config::default(),
    };

    let socket = UdpSocket::bind(config.listen_addr)?;
    let client = OscClient::connect(config.client_addr)?;
    info!("OSC server listening on {}", config.listen_addr);
    info!("sending generated notes to {}", config.client_addr);
    info!("using echo model backend; wire a real model through duet::Model");

    let session = spawn_session(config, Arc::new(EchoModel), client);
    listen(socket, session.command_tx.clone());
    Ok(())
}
