use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use framelink::{
    setup_local_tracing, AppResult, ChannelEvents, FrameworkConfig, PeerEvent, PeerServer,
};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Echo server built on the peer framework: every frame received from a peer
/// is sent straight back to it. Events from all worker tasks are drained by
/// one consumer, which is the intended consumption pattern for owners that
/// need a single-threaded context.
#[tokio::main]
async fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    if std::env::var("RUST_LOG").is_err() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    setup_local_tracing()?;

    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let config = FrameworkConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let (events, event_rx) = ChannelEvents::unbounded();
    let server = Arc::new(PeerServer::new(config.network, events));
    server.listen().await?;

    let echo_loop = {
        let server = server.clone();
        tokio::spawn(async move {
            while let Ok(event) = event_rx.recv().await {
                match event {
                    PeerEvent::Opened(peer_id) => info!("peer {} opened", peer_id),
                    PeerEvent::Closed(peer_id) => info!("peer {} closed", peer_id),
                    PeerEvent::Message(peer_id, payload) => {
                        if !server.send(peer_id, &payload) {
                            error!("echo to peer {} failed", peer_id);
                        }
                    }
                }
            }
        })
    };

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    server.shutdown();
    echo_loop.abort();
    Ok(())
}
