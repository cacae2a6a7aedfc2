use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Mutex;
use tokio::time::{Duration, MissedTickBehavior, interval};

use arcade_racer::config::{ServerConfig, WorldConfig};
use arcade_racer::net::start_websocket_server;
use arcade_racer::state::RaceState;

#[derive(Parser, Debug)]
#[command(name = "arcade-racer", about = "Top-down arcade racing physics server")]
struct Args {
    /// WebSocket bind address (overrides RACER_BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Simulation rate in Hz (overrides RACER_TICK_HZ)
    #[arg(long)]
    tick_hz: Option<u32>,

    /// Attach the debug overlay to every snapshot
    #[arg(long)]
    debug_overlay: bool,

    /// TOML file with world settings
    #[arg(long)]
    world_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut server = ServerConfig::from_env();
    if let Some(bind) = args.bind {
        server.bind_addr = bind;
    }
    if let Some(hz) = args.tick_hz.filter(|hz| *hz > 0) {
        server.tick_hz = hz;
    }
    server.debug_overlay |= args.debug_overlay;

    let world_config = match &args.world_config {
        Some(path) => WorldConfig::from_toml_file(path)
            .with_context(|| format!("loading world config from {}", path.display()))?,
        None => WorldConfig::default(),
    };

    tracing::info!(
        bind = %server.bind_addr,
        tick_hz = server.tick_hz,
        debug_overlay = server.debug_overlay,
        "starting race server"
    );

    let mut race = RaceState::with_arena(world_config);
    race.debug_overlay = server.debug_overlay;
    let state = Arc::new(Mutex::new(race));

    let net_state = Arc::clone(&state);
    let bind_addr = server.bind_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = start_websocket_server(bind_addr, net_state).await {
            tracing::error!("websocket server stopped: {e}");
        }
    });

    // Fixed timestep
    let dt = server.dt();
    let mut ticker = interval(Duration::from_secs_f32(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let mut race = state.lock().await;
        for event in race.tick(dt) {
            tracing::debug!(?event, "race event");
        }
        race.broadcast_snapshot();
    }
}
