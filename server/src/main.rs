use clap::Parser;
use log::{error, info};
use server::network::{BoxError, Server, ServerConfig};
use shared::{BROADCAST_INTERVAL_MS, MAX_PLAYERS};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Milliseconds between state broadcasts
    #[arg(short, long, default_value_t = BROADCAST_INTERVAL_MS)]
    broadcast_interval_ms: u64,

    /// Maximum number of simultaneously joined players
    #[arg(short, long, default_value_t = MAX_PLAYERS)]
    max_players: usize,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        broadcast_interval: Duration::from_millis(args.broadcast_interval_ms.max(1)),
        max_players: args.max_players,
    };

    info!(
        "Starting server: {} players max, broadcasting every {:?}",
        config.max_players, config.broadcast_interval
    );

    let server = Server::bind(config).await?;
    let handle = server.handle();
    let server_task = tokio::spawn(server.run());

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server stopped with error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
