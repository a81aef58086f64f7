// Connection manager
// Owns the local endpoint and the authoritative set of live connections,
// keyed by remote identity. A background pump task translates transport
// events into manager events; incoming connections are registered before
// observers run, so handlers may send to them immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::Envelope;
use crate::error::{Error, Result};
use crate::events::{EventHandlers, HandlerId};
use crate::transport::{EndpointHandle, PeerId, Transport, TransportEvent};

/// Events observable on a manager instance.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Inbound connection accepted and registered.
    Incoming { remote: PeerId },
    /// Decoded envelope from a connected peer.
    Data { remote: PeerId, envelope: Envelope },
    /// A connection closed, for any reason.
    Disconnected { remote: PeerId },
}

/// One live bidirectional link to a remote peer. Presence in the manager's
/// set is the liveness signal; closed connections are removed.
#[derive(Debug, Clone)]
pub struct Connection {
    pub remote: PeerId,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    endpoint: Mutex<Option<Arc<dyn EndpointHandle>>>,
    local_id: Mutex<Option<PeerId>>,
    connections: Mutex<HashMap<PeerId, Connection>>,
    events: EventHandlers<ConnectionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, connect_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                connect_timeout,
                endpoint: Mutex::new(None),
                local_id: Mutex::new(None),
                connections: Mutex::new(HashMap::new()),
                events: EventHandlers::new(),
                pump: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Open the local endpoint, optionally requesting a specific id.
    /// Resolves with the transport-assigned identity once the endpoint is
    /// ready to accept and initiate connections.
    pub async fn open_endpoint(&self, requested_id: Option<String>) -> Result<PeerId> {
        if self.inner.endpoint.lock().expect("endpoint lock").is_some() {
            return Err(Error::InvalidState("endpoint already open"));
        }

        let endpoint = self.inner.transport.open(requested_id).await?;
        let id = endpoint.id.clone();

        *self.inner.endpoint.lock().expect("endpoint lock") = Some(endpoint.handle);
        *self.inner.local_id.lock().expect("local id lock") = Some(id.clone());

        let pump = tokio::spawn(Self::pump(self.inner.clone(), endpoint.events));
        *self.inner.pump.lock().expect("pump lock") = Some(pump);

        info!(peer = %id, "endpoint open");
        Ok(id)
    }

    /// Identity of the local endpoint, once open.
    pub fn local_id(&self) -> Option<PeerId> {
        self.inner.local_id.lock().expect("local id lock").clone()
    }

    /// Open a connection to a remote identity with a bounded wait.
    pub async fn connect(&self, remote: &PeerId) -> Result<()> {
        let handle = self.handle().ok_or(Error::InvalidState("no endpoint open"))?;

        match tokio::time::timeout(self.inner.connect_timeout, handle.connect(remote)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(Error::ConnectTimeout(remote.clone())),
        }

        self.register(remote.clone());
        info!(peer = %remote, "connected");
        Ok(())
    }

    /// Best-effort direct send: silently no-ops without a live connection.
    /// Callers are not required to check liveness first.
    pub fn send(&self, remote: &PeerId, envelope: &Envelope) {
        let live = self
            .inner
            .connections
            .lock()
            .expect("connections lock")
            .contains_key(remote);
        if !live {
            return;
        }
        if let Some(handle) = self.handle() {
            if let Err(e) = handle.send(remote, envelope.to_value()) {
                debug!(peer = %remote, "send dropped: {}", e);
            }
        }
    }

    /// Send to every live connection. Delivery is independent per recipient;
    /// one unreachable peer never blocks the rest.
    pub fn broadcast(&self, envelope: &Envelope) {
        let handle = match self.handle() {
            Some(h) => h,
            None => return,
        };
        let targets: Vec<PeerId> = self
            .inner
            .connections
            .lock()
            .expect("connections lock")
            .keys()
            .cloned()
            .collect();

        let payload = envelope.to_value();
        for remote in targets {
            if let Err(e) = handle.send(&remote, payload.clone()) {
                debug!(peer = %remote, "broadcast skipped unreachable peer: {}", e);
            }
        }
    }

    /// Snapshot of the live connection set.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .connections
            .lock()
            .expect("connections lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn is_connected(&self, remote: &PeerId) -> bool {
        self.inner
            .connections
            .lock()
            .expect("connections lock")
            .contains_key(remote)
    }

    pub fn on(&self, handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    /// Close all connections and release the endpoint. Idempotent; safe to
    /// call before the endpoint was ever opened.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pump) = self.inner.pump.lock().expect("pump lock").take() {
            pump.abort();
        }
        if let Some(handle) = self.inner.endpoint.lock().expect("endpoint lock").take() {
            handle.close();
        }
        self.inner.connections.lock().expect("connections lock").clear();
        debug!("connection manager destroyed");
    }

    fn handle(&self) -> Option<Arc<dyn EndpointHandle>> {
        self.inner.endpoint.lock().expect("endpoint lock").clone()
    }

    fn register(&self, remote: PeerId) {
        self.inner
            .connections
            .lock()
            .expect("connections lock")
            .insert(remote.clone(), Connection { remote });
    }

    async fn pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Incoming { remote } => {
                    inner.connections.lock().expect("connections lock").insert(
                        remote.clone(),
                        Connection {
                            remote: remote.clone(),
                        },
                    );
                    inner.events.emit(&ConnectionEvent::Incoming { remote });
                }
                TransportEvent::Data { remote, payload } => match Envelope::from_value(&payload) {
                    Some(envelope) => {
                        inner
                            .events
                            .emit(&ConnectionEvent::Data { remote, envelope });
                    }
                    None => {
                        debug!(peer = %remote, "ignoring unknown payload");
                    }
                },
                TransportEvent::Closed { remote } => {
                    let removed = inner
                        .connections
                        .lock()
                        .expect("connections lock")
                        .remove(&remote)
                        .is_some();
                    if removed {
                        warn!(peer = %remote, "connection closed");
                        inner.events.emit(&ConnectionEvent::Disconnected { remote });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use serde_json::json;
    use std::time::Duration;

    fn manager(net: &MemoryNetwork) -> ConnectionManager {
        ConnectionManager::new(Arc::new(net.clone()), Duration::from_secs(1))
    }

    fn ping() -> Envelope {
        Envelope::CustomEvent {
            event_name: "ping".into(),
            data: json!({}),
        }
    }

    async fn recv_or_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_incoming_connection_registered_before_handler_runs() {
        let net = MemoryNetwork::new();
        let host = manager(&net);
        host.open_endpoint(Some("host".into())).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let host_probe = host.clone();
        host.on(move |event| {
            if let ConnectionEvent::Incoming { remote } = event {
                // The connection must be targetable from inside the handler.
                tx.send(host_probe.is_connected(remote)).unwrap();
            }
        });

        let client = manager(&net);
        client.open_endpoint(None).await.unwrap();
        client.connect(&"host".into()).await.unwrap();

        assert!(recv_or_timeout(&mut rx).await);
    }

    #[tokio::test]
    async fn test_connect_refused_for_unknown_peer() {
        let net = MemoryNetwork::new();
        let client = manager(&net);
        client.open_endpoint(None).await.unwrap();

        let err = client.connect(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectRefused { .. }));
        assert!(client.connections().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_connection_is_a_noop() {
        let net = MemoryNetwork::new();
        let lone = manager(&net);
        lone.open_endpoint(None).await.unwrap();

        // Deliberate design: no panic, no error surface.
        lone.send(&"nobody".into(), &ping());
    }

    #[tokio::test]
    async fn test_broadcast_skips_dead_peer_without_blocking_others() {
        let net = MemoryNetwork::new();
        let host = manager(&net);
        host.open_endpoint(Some("host".into())).await.unwrap();

        let mut client_rxs = Vec::new();
        let mut client_ids = Vec::new();
        for _ in 0..3 {
            let client = manager(&net);
            let id = client.open_endpoint(None).await.unwrap();
            let (tx, rx) = mpsc::unbounded_channel();
            client.on(move |event| {
                if let ConnectionEvent::Data { envelope, .. } = event {
                    tx.send(envelope.to_value()).unwrap();
                }
            });
            client.connect(&"host".into()).await.unwrap();
            client_rxs.push(rx);
            client_ids.push(id);
        }

        // Wait until the host has registered all three.
        for _ in 0..50 {
            if host.connections().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(host.connections().len(), 3);

        // First client vanishes without the host noticing.
        net.kill(&client_ids[0]);

        host.broadcast(&ping());

        for rx in client_rxs.iter_mut().skip(1) {
            let value = recv_or_timeout(rx).await;
            assert_eq!(value["eventName"], json!("ping"));
        }
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent_and_closes_connections() {
        let net = MemoryNetwork::new();
        let host = manager(&net);
        host.open_endpoint(Some("host".into())).await.unwrap();

        let client = manager(&net);
        client.open_endpoint(None).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(move |event| {
            if let ConnectionEvent::Disconnected { remote } = event {
                tx.send(remote.clone()).unwrap();
            }
        });
        client.connect(&"host".into()).await.unwrap();

        host.destroy();
        host.destroy(); // second call is a no-op

        assert_eq!(recv_or_timeout(&mut rx).await, "host".into());

        // Destroy before open must also be safe.
        let fresh = manager(&net);
        fresh.destroy();
    }
}
