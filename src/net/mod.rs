// Peer connection layer
// Envelope protocol plus the connection manager that pumps transport events

pub mod manager;
pub mod protocol;

pub use manager::{Connection, ConnectionEvent, ConnectionManager};
pub use protocol::Envelope;
