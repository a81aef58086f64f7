// Room directory / matchmaking service
// A per-peer, eventually consistent registry of open rooms. Each hosting
// peer owns exactly one room record and is its only writer; replicas
// converge through direct broadcasts to connected peers. Staleness is the
// only garbage collection: rooms whose host vanished silently age out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::MatchmakingConfig;
use crate::error::{Error, Result};
use crate::events::{EventHandlers, HandlerId};
use crate::net::{ConnectionEvent, ConnectionManager, Envelope};
use crate::transport::PeerId;

/// A discoverable, host-owned room record. Serializes camelCase; this is
/// the exact shape carried inside `roomUpdate` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: String,
    pub host: PeerId,
    /// Unix millis at registration; drives staleness eviction.
    pub created_at: u64,
    pub players: u32,
    pub max_players: u32,
    pub game_name: String,
    pub game_mode: String,
    pub is_private: bool,
    /// Only the flag crosses the wire; the secret itself stays host-local.
    pub has_password: bool,
    pub region: String,
    /// One slot per player, index-aligned with join order.
    pub scores: Vec<i64>,
    /// Diagnostic only; never used for merge decisions.
    pub last_update: u64,
}

/// Registration metadata; unset fields fall back to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RoomMetadata {
    pub max_players: Option<u32>,
    pub game_name: Option<String>,
    pub game_mode: Option<String>,
    pub is_private: bool,
    pub password: Option<String>,
    pub region: Option<String>,
}

/// Partial update shallow-merged into the owned room.
#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub players: Option<u32>,
    pub max_players: Option<u32>,
    pub game_name: Option<String>,
    pub game_mode: Option<String>,
    pub scores: Option<Vec<i64>>,
}

/// Strict-equality room query: every supplied key must match exactly.
#[derive(Debug, Clone, Default)]
pub struct RoomFilter {
    pub game_name: Option<String>,
    pub game_mode: Option<String>,
    pub region: Option<String>,
    pub max_players: Option<u32>,
    pub has_password: Option<bool>,
}

impl RoomFilter {
    fn matches(&self, room: &RoomRecord) -> bool {
        self.game_name.as_ref().map_or(true, |v| *v == room.game_name)
            && self.game_mode.as_ref().map_or(true, |v| *v == room.game_mode)
            && self.region.as_ref().map_or(true, |v| *v == room.region)
            && self.max_players.map_or(true, |v| v == room.max_players)
            && self.has_password.map_or(true, |v| v == room.has_password)
    }
}

/// Connection coordinates returned by `join_room`. Password presence is
/// validated here; correctness is the host's business during the actual
/// connection handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinTicket {
    pub room_id: String,
    pub host: PeerId,
    pub password: Option<String>,
}

/// Fired whenever the visible room set changes (register, update, removal,
/// remote broadcast, heartbeat sweep).
#[derive(Debug, Clone)]
pub struct RoomsUpdated {
    pub rooms: Vec<RoomRecord>,
}

struct OwnRoom {
    record: RoomRecord,
    /// Kept host-local only, never broadcast.
    password: Option<String>,
}

struct DirInner {
    conman: ConnectionManager,
    local: PeerId,
    config: MatchmakingConfig,
    own: Mutex<Option<OwnRoom>>,
    rooms: Mutex<HashMap<String, RoomRecord>>,
    events: EventHandlers<RoomsUpdated>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    conn_handler: Mutex<Option<HandlerId>>,
    destroyed: AtomicBool,
}

/// The per-peer room registry.
#[derive(Clone)]
pub struct RoomDirectory {
    inner: Arc<DirInner>,
}

/// Capability for mutating the one room this peer hosts. Returned by
/// `register_room`; all host-only writes go through it, so a peer that never
/// registered simply has nothing to call. A handle left over from a replaced
/// or unregistered room fails with `NoRoomRegistered`.
pub struct RoomHost {
    inner: Arc<DirInner>,
    room_id: String,
}

impl RoomDirectory {
    /// Ready as soon as the manager has an open endpoint; fails otherwise
    /// (the directory shares the session's transport identity).
    pub fn new(conman: ConnectionManager, config: MatchmakingConfig) -> Result<Self> {
        let local = conman
            .local_id()
            .ok_or(Error::InvalidState("matchmaking service not initialized"))?;

        let inner = Arc::new(DirInner {
            conman: conman.clone(),
            local,
            config,
            own: Mutex::new(None),
            rooms: Mutex::new(HashMap::new()),
            events: EventHandlers::new(),
            sweep: Mutex::new(None),
            conn_handler: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        let hook = inner.clone();
        let handler = conman.on(move |event| match event {
            ConnectionEvent::Incoming { remote } => {
                // New peers receive our room as part of connection setup.
                let own = hook
                    .own
                    .lock()
                    .expect("own room lock")
                    .as_ref()
                    .map(|own| own.record.clone());
                if let Some(record) = own {
                    hook.conman.send(remote, &Envelope::RoomUpdate { room: record });
                }
            }
            ConnectionEvent::Data { envelope, .. } => match envelope {
                Envelope::RoomUpdate { room } => hook.apply_room_update(room.clone()),
                Envelope::RoomRemoval { room_id } => hook.apply_room_removal(room_id),
                _ => {}
            },
            ConnectionEvent::Disconnected { .. } => {}
        });
        *inner.conn_handler.lock().expect("handler lock") = Some(handler);

        let sweeper = inner.clone();
        let interval = Duration::from_secs(inner.config.heartbeat_interval_secs.max(1));
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                sweeper.sweep();
            }
        });
        *inner.sweep.lock().expect("sweep lock") = Some(sweep);

        Ok(Self { inner })
    }

    /// Register (or replace) the room this peer hosts.
    pub fn register_room(&self, room_id: &str, metadata: RoomMetadata) -> Result<RoomHost> {
        let cfg = &self.inner.config;
        let now = now_millis();
        let record = RoomRecord {
            id: room_id.to_string(),
            host: self.inner.local.clone(),
            created_at: now,
            players: 1,
            max_players: metadata.max_players.unwrap_or(cfg.default_max_players),
            game_name: metadata
                .game_name
                .unwrap_or_else(|| cfg.default_game_name.clone()),
            game_mode: metadata
                .game_mode
                .unwrap_or_else(|| cfg.default_game_mode.clone()),
            is_private: metadata.is_private,
            has_password: metadata.password.is_some(),
            region: metadata.region.unwrap_or_else(|| cfg.region.clone()),
            scores: vec![0],
            last_update: now,
        };

        let replaced = {
            let mut own = self.inner.own.lock().expect("own room lock");
            let old_id = own
                .as_ref()
                .filter(|o| o.record.id != record.id)
                .map(|o| o.record.id.clone());
            *own = Some(OwnRoom {
                record: record.clone(),
                password: metadata.password,
            });
            old_id
        };

        if let Some(old_id) = replaced {
            self.inner.rooms.lock().expect("rooms lock").remove(&old_id);
            self.inner
                .conman
                .broadcast(&Envelope::RoomRemoval { room_id: old_id });
        }

        self.inner
            .rooms
            .lock()
            .expect("rooms lock")
            .insert(record.id.clone(), record.clone());
        self.inner.conman.broadcast(&Envelope::RoomUpdate { room: record });
        self.inner.fire_rooms_updated();

        info!(room = room_id, "room registered");
        Ok(RoomHost {
            inner: self.inner.clone(),
            room_id: room_id.to_string(),
        })
    }

    /// All cached rooms, owned and remote.
    pub fn rooms(&self) -> Vec<RoomRecord> {
        self.inner.rooms.lock().expect("rooms lock").values().cloned().collect()
    }

    /// The locally hosted room, if any.
    pub fn own_room(&self) -> Option<RoomRecord> {
        self.inner
            .own
            .lock()
            .expect("own room lock")
            .as_ref()
            .map(|own| own.record.clone())
    }

    /// Cached rooms where every supplied filter key matches exactly.
    pub fn find_rooms(&self, filter: &RoomFilter) -> Vec<RoomRecord> {
        self.inner
            .rooms
            .lock()
            .expect("rooms lock")
            .values()
            .filter(|room| filter.matches(room))
            .cloned()
            .collect()
    }

    /// Validate a join attempt and return connection coordinates. Password
    /// presence (not correctness) is checked against the record's flag.
    pub fn join_room(&self, room_id: &str, password: Option<&str>) -> Result<JoinTicket> {
        let rooms = self.inner.rooms.lock().expect("rooms lock");
        let room = rooms
            .get(room_id)
            .ok_or_else(|| Error::RoomNotFound(room_id.to_string()))?;
        if room.has_password && password.is_none() {
            return Err(Error::PasswordRequired(room_id.to_string()));
        }
        Ok(JoinTicket {
            room_id: room.id.clone(),
            host: room.host.clone(),
            password: password.map(str::to_string),
        })
    }

    /// Run one staleness sweep immediately (the background heartbeat calls
    /// this on its interval).
    pub fn sweep_now(&self) {
        self.inner.sweep();
    }

    pub fn on(&self, handler: impl Fn(&RoomsUpdated) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Cancel the heartbeat, withdraw an owned room, detach from the
    /// connection manager. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(sweep) = self.inner.sweep.lock().expect("sweep lock").take() {
            sweep.abort();
        }
        if let Some(handler) = self.inner.conn_handler.lock().expect("handler lock").take() {
            self.inner.conman.off(handler);
        }
        let own_id = self
            .inner
            .own
            .lock()
            .expect("own room lock")
            .take()
            .map(|own| own.record.id);
        if let Some(room_id) = own_id {
            self.inner.rooms.lock().expect("rooms lock").remove(&room_id);
            self.inner.conman.broadcast(&Envelope::RoomRemoval { room_id });
        }
    }
}

impl RoomHost {
    /// Shallow-merge a partial update into the owned room, persist it into
    /// the cache and re-broadcast.
    pub fn update(&self, patch: RoomPatch) -> Result<()> {
        let record = self.mutate(|record| {
            if let Some(players) = patch.players {
                record.players = players;
            }
            if let Some(max_players) = patch.max_players {
                record.max_players = max_players;
            }
            if let Some(game_name) = &patch.game_name {
                record.game_name = game_name.clone();
            }
            if let Some(game_mode) = &patch.game_mode {
                record.game_mode = game_mode.clone();
            }
            if let Some(scores) = &patch.scores {
                record.scores = scores.clone();
            }
            Ok(())
        })?;
        self.publish(record);
        Ok(())
    }

    /// Host-side bookkeeping for one newly joined client: bump the player
    /// count and append a zero score slot.
    pub fn add_player(&self) -> Result<()> {
        let record = self.mutate(|record| {
            record.players += 1;
            record.scores.push(0);
            Ok(())
        })?;
        self.publish(record);
        Ok(())
    }

    /// Apply a score delta for one player slot. The new vector is built as a
    /// copy and swapped in whole, so no broadcast ever observes a
    /// half-updated array.
    pub fn update_score(&self, player_index: usize, delta: i64) -> Result<()> {
        let record = self.mutate(|record| {
            if player_index >= record.players as usize {
                return Err(Error::ScoreIndexOutOfRange {
                    index: player_index,
                    players: record.players,
                });
            }
            let mut scores = record.scores.clone();
            scores[player_index] += delta;
            record.scores = scores;
            Ok(())
        })?;
        self.publish(record);
        Ok(())
    }

    /// Current score vector of the owned room.
    pub fn scores(&self) -> Result<Vec<i64>> {
        let own = self.inner.own.lock().expect("own room lock");
        match own.as_ref() {
            Some(o) if o.record.id == self.room_id => Ok(o.record.scores.clone()),
            _ => Err(Error::NoRoomRegistered),
        }
    }

    /// Withdraw the room: drop it from the cache, broadcast a removal
    /// notice, clear ownership.
    pub fn unregister(&self) -> Result<()> {
        {
            let mut own = self.inner.own.lock().expect("own room lock");
            match own.as_ref() {
                Some(o) if o.record.id == self.room_id => {}
                _ => return Err(Error::NoRoomRegistered),
            }
            *own = None;
        }
        self.inner.rooms.lock().expect("rooms lock").remove(&self.room_id);
        self.inner.conman.broadcast(&Envelope::RoomRemoval {
            room_id: self.room_id.clone(),
        });
        self.inner.fire_rooms_updated();
        info!(room = %self.room_id, "room unregistered");
        Ok(())
    }

    /// Mutate the owned record under the lock; returns a clone for
    /// publication. Fails with `NoRoomRegistered` for a stale handle.
    fn mutate(&self, f: impl FnOnce(&mut RoomRecord) -> Result<()>) -> Result<RoomRecord> {
        let mut own = self.inner.own.lock().expect("own room lock");
        let own_room = match own.as_mut() {
            Some(o) if o.record.id == self.room_id => o,
            _ => return Err(Error::NoRoomRegistered),
        };
        f(&mut own_room.record)?;

        // Score-array length must always equal the player count; re-pad with
        // zeros if a prior partial update left it short. Idempotent repair.
        let players = own_room.record.players as usize;
        while own_room.record.scores.len() < players {
            own_room.record.scores.push(0);
        }
        own_room.record.last_update = now_millis();
        Ok(own_room.record.clone())
    }

    fn publish(&self, record: RoomRecord) {
        self.inner
            .rooms
            .lock()
            .expect("rooms lock")
            .insert(record.id.clone(), record.clone());
        self.inner.conman.broadcast(&Envelope::RoomUpdate { room: record });
        self.inner.fire_rooms_updated();
    }
}

impl DirInner {
    fn apply_room_update(&self, room: RoomRecord) {
        if room.host == self.local {
            return; // our own record echoed back; we are authoritative
        }
        debug!(room = %room.id, host = %room.host, "room update");
        self.rooms.lock().expect("rooms lock").insert(room.id.clone(), room);
        self.fire_rooms_updated();
    }

    fn apply_room_removal(&self, room_id: &str) {
        let owned = self
            .own
            .lock()
            .expect("own room lock")
            .as_ref()
            .map(|o| o.record.id == room_id)
            .unwrap_or(false);
        if owned {
            return; // only the host may remove its room
        }
        if self.rooms.lock().expect("rooms lock").remove(room_id).is_some() {
            self.fire_rooms_updated();
        }
    }

    /// Evict every cached non-owned room whose age exceeds the staleness
    /// threshold; the sole GC path for rooms whose host silently vanished.
    fn sweep(&self) {
        let stale_ms = self.config.stale_after_secs.saturating_mul(1000);
        let now = now_millis();
        let own_id = self
            .own
            .lock()
            .expect("own room lock")
            .as_ref()
            .map(|o| o.record.id.clone());

        {
            let mut rooms = self.rooms.lock().expect("rooms lock");
            rooms.retain(|id, room| {
                if Some(id.as_str()) == own_id.as_deref() {
                    return true; // an owned room never ages out locally
                }
                let fresh = now.saturating_sub(room.created_at) <= stale_ms;
                if !fresh {
                    debug!(room = %id, "evicting stale room");
                }
                fresh
            });
        }
        self.fire_rooms_updated();
    }

    fn fire_rooms_updated(&self) {
        let rooms = self.rooms.lock().expect("rooms lock").values().cloned().collect();
        self.events.emit(&RoomsUpdated { rooms });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use std::time::Duration;

    async fn directory(net: &MemoryNetwork, id: Option<&str>) -> (RoomDirectory, ConnectionManager) {
        let conman = ConnectionManager::new(Arc::new(net.clone()), Duration::from_secs(1));
        conman
            .open_endpoint(id.map(str::to_string))
            .await
            .expect("endpoint");
        let dir = RoomDirectory::new(conman.clone(), MatchmakingConfig::default()).unwrap();
        (dir, conman)
    }

    fn stale_record(id: &str, host: &str, age_secs: u64) -> RoomRecord {
        RoomRecord {
            id: id.to_string(),
            host: host.into(),
            created_at: now_millis().saturating_sub(age_secs * 1000),
            players: 1,
            max_players: 8,
            game_name: "Untitled Game".into(),
            game_mode: "standard".into(),
            is_private: false,
            has_password: false,
            region: "global".into(),
            scores: vec![0],
            last_update: now_millis(),
        }
    }

    #[tokio::test]
    async fn test_directory_requires_open_endpoint() {
        let net = MemoryNetwork::new();
        let conman = ConnectionManager::new(Arc::new(net), Duration::from_secs(1));
        let err = RoomDirectory::new(conman, MatchmakingConfig::default())
            .err()
            .expect("directory built without an endpoint");
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_register_find_unregister_cycle() {
        let net = MemoryNetwork::new();
        let (dir, _) = directory(&net, Some("host")).await;

        let host = dir
            .register_room(
                "host",
                RoomMetadata {
                    max_players: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();

        let found = dir.find_rooms(&RoomFilter {
            game_mode: Some("standard".into()),
            ..Default::default()
        });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].max_players, 2);
        assert_eq!(found[0].players, 1);
        assert_eq!(found[0].scores, vec![0]);

        host.unregister().unwrap();
        assert!(dir
            .find_rooms(&RoomFilter {
                game_mode: Some("standard".into()),
                ..Default::default()
            })
            .is_empty());

        // The capability is dead after unregistering.
        assert!(matches!(host.add_player(), Err(Error::NoRoomRegistered)));
    }

    #[tokio::test]
    async fn test_add_player_keeps_scores_padded() {
        let net = MemoryNetwork::new();
        let (dir, _) = directory(&net, Some("host")).await;
        let host = dir.register_room("host", RoomMetadata::default()).unwrap();

        for _ in 0..3 {
            host.add_player().unwrap();
        }
        let room = dir.own_room().unwrap();
        assert_eq!(room.players, 4);
        assert_eq!(room.scores.len(), 4);

        // Interleaving score updates never breaks the invariant.
        host.update_score(2, 5).unwrap();
        host.add_player().unwrap();
        let room = dir.own_room().unwrap();
        assert_eq!(room.players, 5);
        assert_eq!(room.scores.len(), 5);
        assert_eq!(room.scores[2], 5);
    }

    #[tokio::test]
    async fn test_update_score_bounds_leave_scores_unchanged() {
        let net = MemoryNetwork::new();
        let (dir, _) = directory(&net, Some("host")).await;
        let host = dir.register_room("host", RoomMetadata::default()).unwrap();
        host.add_player().unwrap();

        let before = host.scores().unwrap();
        let err = host.update_score(2, 1).unwrap_err();
        assert!(matches!(err, Error::ScoreIndexOutOfRange { index: 2, players: 2 }));
        assert_eq!(host.scores().unwrap(), before);

        host.update_score(1, 3).unwrap();
        assert_eq!(host.scores().unwrap(), vec![0, 3]);
    }

    #[tokio::test]
    async fn test_join_room_validates_presence_and_password() {
        let net = MemoryNetwork::new();
        let (dir, _) = directory(&net, Some("host")).await;
        let _host = dir
            .register_room(
                "host",
                RoomMetadata {
                    password: Some("sesame".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(matches!(
            dir.join_room("nope", None),
            Err(Error::RoomNotFound(_))
        ));
        assert!(matches!(
            dir.join_room("host", None),
            Err(Error::PasswordRequired(_))
        ));

        let ticket = dir.join_room("host", Some("sesame")).unwrap();
        assert_eq!(ticket.host, "host".into());
        assert_eq!(ticket.password.as_deref(), Some("sesame"));

        // The password flag crosses the wire; the secret must not.
        let room = dir.own_room().unwrap();
        assert!(room.has_password);
        let wire = serde_json::to_string(&room).unwrap();
        assert!(!wire.contains("sesame"));
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_remote_rooms_but_never_own() {
        let net = MemoryNetwork::new();
        let (dir, _) = directory(&net, Some("host")).await;
        let _host = dir.register_room("host", RoomMetadata::default()).unwrap();

        // Make our own room ancient too: it must survive regardless.
        dir.inner
            .own
            .lock()
            .unwrap()
            .as_mut()
            .unwrap()
            .record
            .created_at = 0;
        dir.inner.rooms.lock().unwrap().get_mut("host").unwrap().created_at = 0;

        dir.inner.apply_room_update(stale_record("old", "ghost", 600));
        dir.inner.apply_room_update(stale_record("fresh", "alive", 10));
        assert_eq!(dir.rooms().len(), 3);

        dir.sweep_now();

        let remaining = dir.find_rooms(&RoomFilter::default());
        let mut ids: Vec<&str> = remaining.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["fresh", "host"]);
    }

    #[tokio::test]
    async fn test_room_broadcasts_reach_connected_peers() {
        let net = MemoryNetwork::new();
        let (host_dir, _host_conman) = directory(&net, Some("host")).await;
        let (client_dir, client_conman) = directory(&net, None).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        client_dir.on(move |update| {
            tx.send(update.rooms.clone()).unwrap();
        });

        // Register first, then connect: the newcomer must still receive the
        // room as part of connection setup.
        let host = host_dir.register_room("host", RoomMetadata::default()).unwrap();
        client_conman.connect(&"host".into()).await.unwrap();

        let rooms = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no roomsUpdated")
            .unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "host");

        // Updates propagate.
        host.add_player().unwrap();
        let rooms = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no roomsUpdated")
            .unwrap();
        assert_eq!(rooms[0].players, 2);

        // Removal propagates.
        host.unregister().unwrap();
        let rooms = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no roomsUpdated")
            .unwrap();
        assert!(rooms.is_empty());
    }
}
