// Lobby demo
// Two in-process peers over the memory transport: one hosts and registers a
// room, the other discovers it through the directory, joins and moves its
// player around.
//
// Usage: cargo run --bin lobby-demo

use std::sync::Arc;
use std::time::Duration;

use peerplay::config::SessionConfig;
use peerplay::matchmaking::{RoomFilter, RoomMetadata};
use peerplay::session::{GameSession, SessionEvent};
use peerplay::transport::MemoryNetwork;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let net = Arc::new(MemoryNetwork::new());
    let mut config = SessionConfig::default();
    config.matchmaking.enabled = true;

    // Host side.
    let host = GameSession::new(net.clone(), config.clone());
    let room_id = host.host_game(None).await?;
    info!("🏠 hosting room {room_id}");

    let directory = host
        .matchmaking()
        .ok_or_else(|| anyhow::anyhow!("matchmaking not initialized"))?;
    let room_host = directory.register_room(
        &room_id,
        RoomMetadata {
            game_name: Some("Lobby Demo".into()),
            game_mode: Some("demo".into()),
            max_players: Some(4),
            ..Default::default()
        },
    )?;

    // Client side.
    let client = GameSession::new(net, config);
    client.on(|event| match event {
        SessionEvent::Connection { remote } => info!("🔗 connected to {remote}"),
        SessionEvent::StateUpdate { object_id, .. } => info!("📦 update for {object_id:?}"),
        SessionEvent::RoomsUpdated { rooms } => info!("🗂️ {} room(s) visible", rooms.len()),
        _ => {}
    });
    client.join_game(&room_id.as_str().into()).await?;

    let client_directory = client
        .matchmaking()
        .ok_or_else(|| anyhow::anyhow!("matchmaking not initialized"))?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let found = client_directory.find_rooms(&RoomFilter {
        game_mode: Some("demo".into()),
        ..Default::default()
    });
    info!("🔍 found {} demo room(s)", found.len());
    for room in &found {
        info!(
            "   {}: {} ({}/{} players)",
            room.id, room.game_name, room.players, room.max_players
        );
    }
    room_host.add_player()?;

    // Wander a bit; the host tick keeps everyone converged.
    for step in 0..5u32 {
        client.move_player(f64::from(step) * 25.0, 100.0)?;
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    for (id, attrs) in host.snapshot() {
        info!(
            "🎮 host sees {}: x={} y={}",
            id.as_str(),
            attrs.get("x").cloned().unwrap_or_default(),
            attrs.get("y").cloned().unwrap_or_default()
        );
    }

    room_host.unregister()?;
    client.destroy();
    host.destroy();
    Ok(())
}
