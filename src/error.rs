// Error taxonomy for the toolkit
// Setup failures are returned to the caller; directory misuse is a synchronous Err

use thiserror::Error;

use crate::transport::PeerId;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested endpoint id is already taken upstream.
    #[error("address in use: {0}")]
    AddressInUse(String),

    /// The remote did not accept the connection within the bounded wait.
    #[error("connection to {0} timed out")]
    ConnectTimeout(PeerId),

    /// The remote refused the connection (or does not exist).
    #[error("connection to {peer} refused: {reason}")]
    ConnectRefused { peer: PeerId, reason: String },

    /// Any other transport-level failure surfaced by the underlying library.
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation called in the wrong session/manager state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Host-only room operation attempted without a registered room.
    #[error("no room registered")]
    NoRoomRegistered,

    /// The room id is not present in the local cache.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// The room is password protected and no password was supplied.
    #[error("password required for room {0}")]
    PasswordRequired(String),

    /// Score index outside [0, players).
    #[error("score index {index} out of range (room has {players} players)")]
    ScoreIndexOutOfRange { index: usize, players: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
