// In-process transport: a hub of per-peer mailboxes
// Reference implementation of the transport boundary. Backs the test suite
// and the demo binary; real deployments plug a WebRTC/relay transport into
// the same traits.

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{EndpointHandle, PeerId, Transport, TransportEndpoint, TransportEvent};
use crate::error::{Error, Result};

struct PeerSlot {
    tx: mpsc::UnboundedSender<TransportEvent>,
    links: HashSet<String>,
}

type Slots = Arc<Mutex<HashMap<String, PeerSlot>>>;

/// Hub connecting any number of in-process endpoints.
///
/// Delivery per channel is ordered (one mpsc mailbox per peer); there is no
/// ordering across channels, matching the transport contract.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    slots: Slots,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a peer without delivering `Closed` to anyone, simulating a host
    /// that silently disappears (power loss, network partition). Remote
    /// caches can then only recover via heartbeat eviction.
    pub fn kill(&self, id: &PeerId) {
        let mut slots = self.slots.lock().expect("memory hub poisoned");
        if let Some(slot) = slots.remove(id.as_str()) {
            for linked in slot.links {
                if let Some(other) = slots.get_mut(&linked) {
                    other.links.remove(id.as_str());
                }
            }
        }
    }

    fn generate_id(slots: &HashMap<String, PeerSlot>) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id: String = (0..8)
                .map(|_| {
                    let n = rng.gen_range(0..36);
                    char::from_digit(n, 36).unwrap_or('0')
                })
                .collect();
            if !slots.contains_key(&id) {
                return id;
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn open(&self, requested_id: Option<String>) -> Result<TransportEndpoint> {
        let mut slots = self.slots.lock().expect("memory hub poisoned");

        let id = match requested_id {
            Some(id) => {
                if slots.contains_key(&id) {
                    return Err(Error::AddressInUse(id));
                }
                id
            }
            None => Self::generate_id(&slots),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        slots.insert(
            id.clone(),
            PeerSlot {
                tx,
                links: HashSet::new(),
            },
        );

        Ok(TransportEndpoint {
            id: PeerId(id.clone()),
            handle: Arc::new(MemoryEndpoint {
                id,
                slots: self.slots.clone(),
            }),
            events: rx,
        })
    }
}

struct MemoryEndpoint {
    id: String,
    slots: Slots,
}

#[async_trait]
impl EndpointHandle for MemoryEndpoint {
    async fn connect(&self, remote: &PeerId) -> Result<()> {
        let mut slots = self.slots.lock().expect("memory hub poisoned");

        if !slots.contains_key(&self.id) {
            return Err(Error::Transport("endpoint closed".into()));
        }
        let remote_slot = slots.get(remote.as_str()).ok_or_else(|| Error::ConnectRefused {
            peer: remote.clone(),
            reason: "no such peer".into(),
        })?;

        remote_slot
            .tx
            .send(TransportEvent::Incoming {
                remote: PeerId(self.id.clone()),
            })
            .map_err(|_| Error::ConnectRefused {
                peer: remote.clone(),
                reason: "peer mailbox closed".into(),
            })?;

        if let Some(slot) = slots.get_mut(remote.as_str()) {
            slot.links.insert(self.id.clone());
        }
        if let Some(slot) = slots.get_mut(&self.id) {
            slot.links.insert(remote.as_str().to_string());
        }
        Ok(())
    }

    fn send(&self, remote: &PeerId, payload: Value) -> Result<()> {
        let slots = self.slots.lock().expect("memory hub poisoned");

        let linked = slots
            .get(&self.id)
            .map(|s| s.links.contains(remote.as_str()))
            .unwrap_or(false);
        if !linked {
            return Err(Error::Transport(format!("no channel to {remote}")));
        }

        match slots.get(remote.as_str()) {
            Some(slot) => slot
                .tx
                .send(TransportEvent::Data {
                    remote: PeerId(self.id.clone()),
                    payload,
                })
                .map_err(|_| Error::Transport(format!("mailbox of {remote} closed"))),
            None => Err(Error::Transport(format!("peer {remote} gone"))),
        }
    }

    fn close(&self) {
        let mut slots = self.slots.lock().expect("memory hub poisoned");
        if let Some(slot) = slots.remove(&self.id) {
            for linked in slot.links {
                if let Some(other) = slots.get_mut(&linked) {
                    other.links.remove(&self.id);
                    let _ = other.tx.send(TransportEvent::Closed {
                        remote: PeerId(self.id.clone()),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requested_id_collision() {
        let net = MemoryNetwork::new();
        let _a = net.open(Some("room1".into())).await.unwrap();
        let err = net
            .open(Some("room1".into()))
            .await
            .err()
            .expect("second open of the same id succeeded");
        assert!(matches!(err, Error::AddressInUse(id) if id == "room1"));
    }

    #[tokio::test]
    async fn test_connect_and_deliver() {
        let net = MemoryNetwork::new();
        let mut host = net.open(Some("host".into())).await.unwrap();
        let client = net.open(None).await.unwrap();

        client.handle.connect(&"host".into()).await.unwrap();
        match host.events.recv().await {
            Some(TransportEvent::Incoming { remote }) => assert_eq!(remote, client.id),
            other => panic!("expected Incoming, got {:?}", other),
        }

        client
            .handle
            .send(&"host".into(), json!({"hello": true}))
            .unwrap();
        match host.events.recv().await {
            Some(TransportEvent::Data { remote, payload }) => {
                assert_eq!(remote, client.id);
                assert_eq!(payload["hello"], json!(true));
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_to_unknown_peer_is_refused() {
        let net = MemoryNetwork::new();
        let ep = net.open(None).await.unwrap();
        let err = ep.handle.connect(&"nobody".into()).await.unwrap_err();
        assert!(matches!(err, Error::ConnectRefused { .. }));
    }

    #[tokio::test]
    async fn test_close_notifies_linked_peers() {
        let net = MemoryNetwork::new();
        let mut host = net.open(Some("host".into())).await.unwrap();
        let client = net.open(None).await.unwrap();
        client.handle.connect(&"host".into()).await.unwrap();
        let _ = host.events.recv().await; // Incoming

        client.handle.close();
        match host.events.recv().await {
            Some(TransportEvent::Closed { remote }) => assert_eq!(remote, client.id),
            other => panic!("expected Closed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_is_silent() {
        let net = MemoryNetwork::new();
        let mut host = net.open(Some("host".into())).await.unwrap();
        let client = net.open(None).await.unwrap();
        client.handle.connect(&"host".into()).await.unwrap();
        let _ = host.events.recv().await;

        net.kill(&client.id);
        // Nothing queued: the disappearance is invisible to the host.
        assert!(host.events.try_recv().is_err());
    }
}
