//! peerplay
//!
//! A peer-to-peer multiplayer toolkit for small session-based games. One
//! peer hosts a room and every client connects directly to it; game state
//! lives in a replicated object store with shallow last-writer-wins merge,
//! custom events ride the same connections, and an optional room directory
//! makes hosted rooms discoverable without any central server.
//!
//! The transport itself (NAT traversal, reliable ordered channels) is
//! pluggable behind [`transport::Transport`]; [`transport::MemoryNetwork`]
//! provides an in-process implementation for tests and demos.
//!
//! ```no_run
//! use std::sync::Arc;
//! use peerplay::config::SessionConfig;
//! use peerplay::session::GameSession;
//! use peerplay::transport::MemoryNetwork;
//!
//! # async fn run() -> peerplay::Result<()> {
//! let net = Arc::new(MemoryNetwork::new());
//! let host = GameSession::new(net.clone(), SessionConfig::default());
//! let room = host.host_game(None).await?;
//!
//! let client = GameSession::new(net, SessionConfig::default());
//! client.join_game(&room.as_str().into()).await?;
//! client.move_player(120.0, 80.0)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod matchmaking;
pub mod net;
pub mod services;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{Error, Result};
pub use session::{GameSession, SessionEvent, SessionRole};
