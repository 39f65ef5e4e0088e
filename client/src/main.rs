use clap::Parser;
use client::network::{AdapterConfig, ClientEvent, ConnectionStatus, NetworkAdapter};
use client::reconcile::RemotePlayers;
use log::{debug, info, warn};
use shared::{
    MovementState, Vec3, BROADCAST_INTERVAL_MS, DEFAULT_INTERPOLATION_RATE, RECONNECT_DELAY_MS,
    SPAWN_POINT,
};
use std::f32::consts::TAU;
use std::time::Duration;
use tokio::time::{interval, Instant};

/// Headless player: walks in a circle and swings now and then
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short, long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name to join with
    #[arg(short, long, default_value = "Bot")]
    name: String,

    /// Milliseconds to wait before reconnecting after a drop
    #[arg(short, long, default_value_t = RECONNECT_DELAY_MS)]
    reconnect_delay_ms: u64,

    /// Remote player smoothing rate
    #[arg(short, long, default_value_t = DEFAULT_INTERPOLATION_RATE)]
    interpolation_rate: f32,

    /// Radius of the walking circle
    #[arg(long, default_value = "6.0")]
    radius: f32,
}

const FRAME_TIME: Duration = Duration::from_micros(16_667);
const SWING_PERIOD_SECS: f32 = 8.0;
const SWING_DURATION_SECS: f32 = 2.0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let config = AdapterConfig {
        url: args.server.clone(),
        reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
    };
    let (mut adapter, mut events) = NetworkAdapter::new(config);
    let mut remotes = RemotePlayers::new(args.interpolation_rate);
    let mut status = adapter.subscribe_status();
    adapter.connect(&args.name).await;

    let mut frame = interval(FRAME_TIME);
    let mut send = interval(Duration::from_millis(BROADCAST_INTERVAL_MS));
    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut was_swinging = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                log_event(&event);
                remotes.apply_event(&event);
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!("Status: {}", current.text());
                if current.status != ConnectionStatus::Connected {
                    remotes.clear();
                }
                if current.status == ConnectionStatus::Full {
                    warn!("Giving up: {}", current.text());
                    adapter.disconnect().await;
                    break;
                }
            }

            _ = frame.tick() => {
                let now = Instant::now();
                remotes.update((now - last_frame).as_secs_f32());
                last_frame = now;
            }

            _ = send.tick() => {
                let elapsed = started.elapsed().as_secs_f32();
                let (position, rotation_y) = circle_pose(elapsed, args.radius);
                let swinging = elapsed % SWING_PERIOD_SECS < SWING_DURATION_SECS;

                if swinging != was_swinging {
                    let anchor =
                        swinging.then(|| Vec3::new(position.x, position.y + 8.0, position.z));
                    if adapter.send_swing(swinging, anchor) {
                        was_swinging = swinging;
                    }
                }

                let state = if swinging {
                    MovementState::Swinging
                } else {
                    MovementState::Walking
                };
                adapter.send_position(position, rotation_y, state);
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                adapter.disconnect().await;
                break;
            }
        }
    }

    Ok(())
}

/// Position and facing along a circle around the spawn point
fn circle_pose(elapsed: f32, radius: f32) -> (Vec3, f32) {
    let angle = (elapsed * 0.5) % TAU;
    let position = Vec3::new(
        SPAWN_POINT.x + radius * angle.cos(),
        SPAWN_POINT.y,
        SPAWN_POINT.z + radius * angle.sin(),
    );
    // Facing along the tangent
    (position, -angle)
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::StatusChanged(status) => debug!("Status event: {}", status.text()),
        ClientEvent::Welcome { your_id, players } => {
            info!("Welcome as {} ({} others online)", your_id, players.len())
        }
        ClientEvent::PlayerJoined(player) => info!("{} joined ({})", player.name, player.id),
        ClientEvent::PlayerLeft { id } => info!("{} left", id),
        ClientEvent::State { players } => debug!("Snapshot with {} remote players", players.len()),
        ClientEvent::ServerFull => warn!("Server is full"),
        ClientEvent::Signal { kind, from_id, .. } => debug!("{:?} from {}", kind, from_id),
    }
}
