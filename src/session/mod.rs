// Game session
// Ties the stack together: hosting/joining state machine, the local player,
// object replication over the connection manager, the host tick broadcast
// and the forwarded service events. One instance per process, one session
// at a time.

pub mod player;

use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventHandlers, HandlerId};
use crate::matchmaking::{RoomDirectory, RoomRecord};
use crate::net::{ConnectionEvent, ConnectionManager, Envelope};
use crate::services::{InputBroadcaster, VoiceEvent, VoiceSignaling};
use crate::state::{Attributes, ObjectId, ReplicatedState};
use crate::transport::{PeerId, Transport};

/// Where the session is in its lifecycle. `Hosting` and `Joined` are the
/// two active states; everything else rejects runtime operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Idle,
    Hosting,
    Joining,
    Joined,
    Destroyed,
}

/// Everything the session surfaces to the application, one observer
/// registry for all of it.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connection { remote: PeerId },
    Disconnection { remote: PeerId },
    /// An object changed; `data` is the patch as received, already applied
    /// to the local store.
    StateUpdate { object_id: ObjectId, data: Attributes },
    ObjectRemoved { object_id: ObjectId },
    Custom { name: String, data: Value },
    RoomsUpdated { rooms: Vec<RoomRecord> },
    VoiceConnected { peer: PeerId },
    VoiceDisconnected { peer: PeerId },
    /// Non-fatal failures mirrored for passive observers; the originating
    /// call still returns the error.
    Error { message: String },
}

struct SessionInner {
    conman: ConnectionManager,
    config: SessionConfig,
    role: Mutex<SessionRole>,
    player_id: Mutex<Option<ObjectId>>,
    state: Mutex<ReplicatedState>,
    events: EventHandlers<SessionEvent>,
    tick: Mutex<Option<JoinHandle<()>>>,
    conn_handler: Mutex<Option<HandlerId>>,
    matchmaking: Mutex<Option<RoomDirectory>>,
    voice: Mutex<Option<VoiceSignaling>>,
    input: Mutex<Option<InputBroadcaster>>,
    destroyed: AtomicBool,
}

#[derive(Clone)]
pub struct GameSession {
    inner: Arc<SessionInner>,
}

impl GameSession {
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let connect_timeout = Duration::from_secs(config.session.connect_timeout_secs.max(1));
        let conman = ConnectionManager::new(transport, connect_timeout);

        let inner = Arc::new(SessionInner {
            conman: conman.clone(),
            config,
            role: Mutex::new(SessionRole::Idle),
            player_id: Mutex::new(None),
            state: Mutex::new(ReplicatedState::new()),
            events: EventHandlers::new(),
            tick: Mutex::new(None),
            conn_handler: Mutex::new(None),
            matchmaking: Mutex::new(None),
            voice: Mutex::new(None),
            input: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });

        // Weak capture: the manager outlives nothing here, and a strong
        // reference from its handler registry back to the session would
        // never drop.
        let hook: Weak<SessionInner> = Arc::downgrade(&inner);
        let handler = conman.on(move |event| {
            if let Some(inner) = hook.upgrade() {
                inner.handle_connection_event(event);
            }
        });
        *inner.conn_handler.lock().expect("handler lock") = Some(handler);

        Self { inner }
    }

    /// Start hosting. Opens an endpoint under `room_id` (or a generated
    /// 8-character id), spawns the local player and the tick loop, and
    /// returns the room id clients join with.
    pub async fn host_game(&self, room_id: Option<&str>) -> Result<String> {
        self.inner.enter(SessionRole::Idle, SessionRole::Joining)?;

        let room_id = room_id.map(str::to_string).unwrap_or_else(generate_room_id);
        let local = match self.inner.conman.open_endpoint(Some(room_id.clone())).await {
            Ok(local) => local,
            Err(err) => {
                self.inner.fail_back_to_idle(&err);
                return Err(err);
            }
        };

        *self.inner.role.lock().expect("role lock") = SessionRole::Hosting;
        self.spawn_local_player(&local);
        self.init_services(&local);
        self.spawn_tick_loop();

        info!(room = %room_id, "hosting game");
        Ok(room_id)
    }

    /// Join a hosted game: connect to the host, announce our player and
    /// request a full snapshot (the host answers immediately, so catch-up
    /// is one round trip).
    pub async fn join_game(&self, host: &PeerId) -> Result<()> {
        self.inner.enter(SessionRole::Idle, SessionRole::Joining)?;

        let setup = async {
            let local = match self.inner.conman.local_id() {
                Some(local) => local, // retry after a failed join reuses the endpoint
                None => self.inner.conman.open_endpoint(None).await?,
            };
            self.inner.conman.connect(host).await?;
            Ok(local)
        };
        let local = match setup.await {
            Ok(local) => local,
            Err(err) => {
                self.inner.fail_back_to_idle(&err);
                return Err(err);
            }
        };

        *self.inner.role.lock().expect("role lock") = SessionRole::Joined;
        self.inner.events.emit(&SessionEvent::Connection {
            remote: host.clone(),
        });
        self.spawn_local_player(&local);
        self.init_services(&local);
        self.inner.conman.broadcast(&Envelope::FullStateRequest);

        info!(%host, "joined game");
        Ok(())
    }

    /// Mint a replicated object owned by the local player, store it and
    /// broadcast its full record.
    pub fn create_game_object(&self, kind: &str, attrs: Attributes) -> Result<ObjectId> {
        self.inner.require_active()?;
        let id = ObjectId::mint_object();

        let mut full = attrs;
        full.insert("type".into(), Value::from(kind));
        if let Some(player_id) = self.player_id() {
            full.insert("ownerId".into(), Value::from(player_id.as_str()));
        }

        self.inner
            .state
            .lock()
            .expect("state lock")
            .set_object(id.clone(), &full);
        self.inner.conman.broadcast(&Envelope::StateUpdate {
            object_id: id.clone(),
            data: full,
        });
        Ok(id)
    }

    /// Shallow-merge a patch into an object and broadcast it.
    pub fn sync_game_object(&self, id: &ObjectId, patch: &Attributes) -> Result<()> {
        self.inner.require_active()?;
        self.inner
            .state
            .lock()
            .expect("state lock")
            .patch_object(id, patch);
        self.inner.conman.broadcast(&Envelope::StateUpdate {
            object_id: id.clone(),
            data: patch.clone(),
        });
        Ok(())
    }

    /// Delete an object everywhere. Without the broadcast the host tick
    /// would resurrect it from the host's copy.
    pub fn remove_game_object(&self, id: &ObjectId) -> Result<()> {
        self.inner.require_active()?;
        if !self.inner.state.lock().expect("state lock").remove_object(id) {
            return Ok(()); // unknown id, nothing to withdraw
        }
        self.inner.conman.broadcast(&Envelope::ObjectRemoval {
            object_id: id.clone(),
        });
        self.inner.events.emit(&SessionEvent::ObjectRemoved {
            object_id: id.clone(),
        });
        Ok(())
    }

    /// Move the local player. A no-op before hosting or joining.
    pub fn move_player(&self, x: f64, y: f64) -> Result<()> {
        let Some(player_id) = self.player_id() else {
            return Ok(());
        };
        let mut patch = Attributes::new();
        patch.insert("x".into(), Value::from(x));
        patch.insert("y".into(), Value::from(y));
        self.sync_game_object(&player_id, &patch)
    }

    /// Fire a custom event locally and relay it to every connected peer.
    pub fn broadcast_event(&self, name: &str, data: Value) -> Result<()> {
        self.inner.require_active()?;
        self.inner.events.emit(&SessionEvent::Custom {
            name: name.to_string(),
            data: data.clone(),
        });
        self.inner.conman.broadcast(&Envelope::CustomEvent {
            event_name: name.to_string(),
            data,
        });
        Ok(())
    }

    pub fn role(&self) -> SessionRole {
        *self.inner.role.lock().expect("role lock")
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.inner.conman.local_id()
    }

    pub fn player_id(&self) -> Option<ObjectId> {
        self.inner.player_id.lock().expect("player id lock").clone()
    }

    /// Snapshot of every replicated object as attribute bags.
    pub fn snapshot(&self) -> Vec<(ObjectId, Attributes)> {
        self.inner.state.lock().expect("state lock").snapshot()
    }

    /// The room directory, when matchmaking is enabled and initialized.
    pub fn matchmaking(&self) -> Option<RoomDirectory> {
        self.inner.matchmaking.lock().expect("matchmaking lock").clone()
    }

    pub fn voice(&self) -> Option<VoiceSignaling> {
        self.inner.voice.lock().expect("voice lock").clone()
    }

    pub fn input(&self) -> Option<InputBroadcaster> {
        self.inner.input.lock().expect("input lock").clone()
    }

    pub fn on(&self, handler: impl Fn(&SessionEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Tear everything down: tick loop, services, connections. Safe from
    /// any state and idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tick) = self.inner.tick.lock().expect("tick lock").take() {
            tick.abort();
        }
        if let Some(dir) = self.inner.matchmaking.lock().expect("matchmaking lock").take() {
            dir.destroy();
        }
        if let Some(voice) = self.inner.voice.lock().expect("voice lock").take() {
            voice.destroy();
        }
        if let Some(input) = self.inner.input.lock().expect("input lock").take() {
            input.destroy();
        }
        if let Some(handler) = self.inner.conn_handler.lock().expect("handler lock").take() {
            self.inner.conman.off(handler);
        }
        self.inner.conman.destroy();
        *self.inner.role.lock().expect("role lock") = SessionRole::Destroyed;
    }

    fn spawn_local_player(&self, local: &PeerId) {
        let player_id = player::player_object_id(local);
        *self.inner.player_id.lock().expect("player id lock") = Some(player_id.clone());

        // The complete record doubles as the full-resync patch for peers
        // that connect later.
        let attrs = player::spawn_attributes(local);
        self.inner
            .state
            .lock()
            .expect("state lock")
            .set_object(player_id.clone(), &attrs);
        self.inner.conman.broadcast(&Envelope::StateUpdate {
            object_id: player_id,
            data: attrs,
        });
    }

    /// Bring up the enabled optional services. Failures are logged and
    /// mirrored as `Error` events; core connectivity proceeds without them.
    fn init_services(&self, local: &PeerId) {
        if self.inner.config.matchmaking.enabled {
            match RoomDirectory::new(self.inner.conman.clone(), self.inner.config.matchmaking.clone()) {
                Ok(dir) => {
                    let hook: Weak<SessionInner> = Arc::downgrade(&self.inner);
                    dir.on(move |update| {
                        if let Some(inner) = hook.upgrade() {
                            inner.events.emit(&SessionEvent::RoomsUpdated {
                                rooms: update.rooms.clone(),
                            });
                        }
                    });
                    *self.inner.matchmaking.lock().expect("matchmaking lock") = Some(dir);
                }
                Err(err) => {
                    warn!(%err, "matchmaking unavailable");
                    self.inner.events.emit(&SessionEvent::Error {
                        message: format!("matchmaking unavailable: {err}"),
                    });
                }
            }
        }

        if self.inner.config.voice.enabled {
            let voice = VoiceSignaling::new(self.inner.conman.clone());
            let hook: Weak<SessionInner> = Arc::downgrade(&self.inner);
            voice.on(move |event| {
                if let Some(inner) = hook.upgrade() {
                    inner.events.emit(&match event {
                        VoiceEvent::Connected { peer } => SessionEvent::VoiceConnected {
                            peer: peer.clone(),
                        },
                        VoiceEvent::Disconnected { peer } => SessionEvent::VoiceDisconnected {
                            peer: peer.clone(),
                        },
                    });
                }
            });
            *self.inner.voice.lock().expect("voice lock") = Some(voice);
        }

        if self.inner.config.input.enabled {
            let input = InputBroadcaster::new(
                self.inner.conman.clone(),
                local.clone(),
                &self.inner.config.input,
            );
            *self.inner.input.lock().expect("input lock") = Some(input);
        }
    }

    /// Host-only resync loop: one `stateUpdate` per object per tick bounds
    /// every client's staleness to a single tick.
    fn spawn_tick_loop(&self) {
        let inner = self.inner.clone();
        let mut millis = 1000 / u64::from(inner.config.session.tick_rate.max(1));
        if millis == 0 {
            warn!(
                tick_rate = inner.config.session.tick_rate,
                "tick rate above 1000 Hz, clamping period to 1ms"
            );
            millis = 1;
        }
        let period = Duration::from_millis(millis);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = inner.state.lock().expect("state lock").snapshot();
                for (object_id, data) in snapshot {
                    inner.conman.broadcast(&Envelope::StateUpdate { object_id, data });
                }
            }
        });
        *self.inner.tick.lock().expect("tick lock") = Some(handle);
    }
}

impl SessionInner {
    /// Atomic state transition guard.
    fn enter(&self, from: SessionRole, to: SessionRole) -> Result<()> {
        let mut role = self.role.lock().expect("role lock");
        if *role != from {
            return Err(Error::InvalidState("session already started"));
        }
        *role = to;
        Ok(())
    }

    fn fail_back_to_idle(&self, err: &Error) {
        *self.role.lock().expect("role lock") = SessionRole::Idle;
        self.events.emit(&SessionEvent::Error {
            message: err.to_string(),
        });
    }

    fn require_active(&self) -> Result<()> {
        match *self.role.lock().expect("role lock") {
            SessionRole::Hosting | SessionRole::Joined => Ok(()),
            _ => Err(Error::InvalidState("session not started")),
        }
    }

    fn handle_connection_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Incoming { remote } => {
                self.events.emit(&SessionEvent::Connection {
                    remote: remote.clone(),
                });
            }
            ConnectionEvent::Disconnected { remote } => {
                self.events.emit(&SessionEvent::Disconnection {
                    remote: remote.clone(),
                });
            }
            ConnectionEvent::Data { remote, envelope } => {
                if self.config.session.debug {
                    debug!(%remote, ?envelope, "inbound");
                }
                self.handle_envelope(remote, envelope);
            }
        }
    }

    fn handle_envelope(&self, remote: &PeerId, envelope: &Envelope) {
        match envelope {
            Envelope::StateUpdate { object_id, data } => {
                self.state
                    .lock()
                    .expect("state lock")
                    .patch_object(object_id, data);
                self.events.emit(&SessionEvent::StateUpdate {
                    object_id: object_id.clone(),
                    data: data.clone(),
                });
            }
            Envelope::CustomEvent { event_name, data } => {
                self.events.emit(&SessionEvent::Custom {
                    name: event_name.clone(),
                    data: data.clone(),
                });
            }
            Envelope::FullStateRequest => {
                // Only the host answers; catch-up latency for a joiner is
                // one round trip instead of one tick.
                if *self.role.lock().expect("role lock") == SessionRole::Hosting {
                    let snapshot = self.state.lock().expect("state lock").snapshot();
                    for (object_id, data) in snapshot {
                        self.conman
                            .send(remote, &Envelope::StateUpdate { object_id, data });
                    }
                }
            }
            Envelope::ObjectRemoval { object_id } => {
                if self.state.lock().expect("state lock").remove_object(object_id) {
                    self.events.emit(&SessionEvent::ObjectRemoved {
                        object_id: object_id.clone(),
                    });
                }
            }
            // The room directory keeps its own subscription.
            Envelope::RoomUpdate { .. } | Envelope::RoomRemoval { .. } => {}
        }
    }
}

fn generate_room_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
