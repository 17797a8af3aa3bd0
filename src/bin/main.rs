use std::{path::PathBuf, process};

use bytes::Bytes;
use pddm::{
    message::{Message, Registry},
    net::TcpClient,
    settings::Settings,
};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "pddm-node")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let peers = settings.address_table();
    let Settings {
        node: node_settings,
        transport: transport_settings,
        log: log_settings,
        ..
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    let registry = Registry::default();
    let handler = move |payload: Bytes| match Message::from_byte_slice(&registry, &payload) {
        Ok(message) => info!("received {}", message),
        Err(err) => warn!("dropping invalid message of {} bytes: {:#}", payload.len(), err),
    };

    let client = TcpClient::bind(
        node_settings.id,
        &node_settings.address,
        transport_settings.max_message_size,
        handler,
    )
    .and_then(TcpClient::spawn)
    .unwrap_or_else(|err| {
        error!("failed to start the transport: {}", err);
        process::exit(1);
    });
    info!(
        "node {} relaying for peers {:?}",
        node_settings.id,
        peers.peers()
    );

    if let Err(err) = signal::ctrl_c().await {
        error!("failed to wait for ctrl-c: {}", err);
    }
    info!("shutting down");
    if let Err(err) = client.shutdown() {
        warn!("{}", err);
    }
}
