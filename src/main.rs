//! Table server (default binary).
//!
//! Wires environment configuration, logging and the TCP adapter around a
//! single in-process lobby with one default room.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockfall::adapter::{run_server, ServerConfig};
use blockfall::engine::{GameConfig, Lobby, Services};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let game = GameConfig::from_env();
    info!(
        min_teams = game.min_teams,
        test_mode = game.test_mode,
        countdown_secs = game.countdown_secs,
        grace_secs = game.grace_secs,
        "game config loaded"
    );

    let lobby = Arc::new(Lobby::new(Arc::new(Services::in_memory(game))));
    let room = lobby.create_room("main");
    info!(room = %room, "default room created");

    let server = ServerConfig::from_env();
    let result = tokio::select! {
        result = run_server(server, Arc::clone(&lobby), None) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };
    lobby.shutdown();
    result
}
