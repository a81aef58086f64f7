// Transport boundary
// The toolkit rides on an external peer-to-peer connection library; this
// module pins down exactly what that library must provide. Connection
// establishment, NAT traversal and reliable ordered delivery all live on the
// far side of this boundary.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryNetwork;

/// Opaque transport-assigned identity of a local endpoint. Stable for the
/// lifetime of the process; doubles as the routing address for direct sends
/// and as the natural key for a hosted room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Events delivered by an open endpoint.
#[derive(Debug)]
pub enum TransportEvent {
    /// A remote peer connected to us; the channel is usable immediately.
    Incoming { remote: PeerId },
    /// Structured payload from a connected peer. The transport handles its
    /// own wire serialization; payloads cross this boundary as JSON values.
    Data { remote: PeerId, payload: Value },
    /// The channel to a remote peer closed, for any reason.
    Closed { remote: PeerId },
}

/// A local endpoint opened on the transport.
pub struct TransportEndpoint {
    /// Assigned identity (the requested id, if it was free).
    pub id: PeerId,
    /// Control half: connect/send/close.
    pub handle: Arc<dyn EndpointHandle>,
    /// Event half: inbound connections, data and closures.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for local endpoints.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a local endpoint, optionally requesting a specific id.
    /// Fails with `Error::AddressInUse` when the requested id is taken.
    async fn open(&self, requested_id: Option<String>) -> Result<TransportEndpoint>;
}

/// Control half of an open endpoint.
#[async_trait]
pub trait EndpointHandle: Send + Sync {
    /// Initiate a connection to a remote identity. Resolves once the channel
    /// is ready; fails with `ConnectRefused` if the remote does not accept.
    async fn connect(&self, remote: &PeerId) -> Result<()>;

    /// Send a structured payload to a connected remote. Delivery over a
    /// single channel is ordered and reliable (the toolkit always requests
    /// reliable mode from the transport).
    fn send(&self, remote: &PeerId, payload: Value) -> Result<()>;

    /// Close all channels and release the endpoint. Idempotent.
    fn close(&self);
}
