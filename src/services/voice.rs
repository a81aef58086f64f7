// Voice chat signaling
// Call offer/accept/hangup negotiation carried over `customEvent`
// envelopes. Media capture and playback are out of scope; this layer only
// tracks who is in a call with whom and surfaces the transitions.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::events::{EventHandlers, HandlerId};
use crate::net::{ConnectionEvent, ConnectionManager, Envelope};
use crate::transport::PeerId;

const CALL_EVENT: &str = "voice.call";
const ACCEPT_EVENT: &str = "voice.accept";
const HANGUP_EVENT: &str = "voice.hangup";

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Connected { peer: PeerId },
    Disconnected { peer: PeerId },
}

struct VoiceInner {
    conman: ConnectionManager,
    active: Mutex<HashSet<PeerId>>,
    events: EventHandlers<VoiceEvent>,
    conn_handler: Mutex<Option<HandlerId>>,
}

#[derive(Clone)]
pub struct VoiceSignaling {
    inner: Arc<VoiceInner>,
}

impl VoiceSignaling {
    /// Incoming calls are auto-accepted; the policy hook for prompting the
    /// player lives above this layer.
    pub fn new(conman: ConnectionManager) -> Self {
        let inner = Arc::new(VoiceInner {
            conman: conman.clone(),
            active: Mutex::new(HashSet::new()),
            events: EventHandlers::new(),
            conn_handler: Mutex::new(None),
        });

        let hook = inner.clone();
        let handler = conman.on(move |event| match event {
            ConnectionEvent::Data { remote, envelope } => {
                if let Envelope::CustomEvent { event_name, .. } = envelope {
                    match event_name.as_str() {
                        CALL_EVENT => {
                            debug!(%remote, "incoming voice call, accepting");
                            hook.conman.send(
                                remote,
                                &Envelope::CustomEvent {
                                    event_name: ACCEPT_EVENT.to_string(),
                                    data: Value::Null,
                                },
                            );
                            hook.mark_connected(remote);
                        }
                        ACCEPT_EVENT => hook.mark_connected(remote),
                        HANGUP_EVENT => hook.mark_disconnected(remote),
                        _ => {}
                    }
                }
            }
            // A dropped transport ends the call too.
            ConnectionEvent::Disconnected { remote } => hook.mark_disconnected(remote),
            ConnectionEvent::Incoming { .. } => {}
        });
        *inner.conn_handler.lock().expect("handler lock") = Some(handler);

        Self { inner }
    }

    /// Offer a call to one peer. `Connected` fires once the accept returns.
    pub fn call(&self, remote: &PeerId) {
        self.inner.conman.send(
            remote,
            &Envelope::CustomEvent {
                event_name: CALL_EVENT.to_string(),
                data: Value::Null,
            },
        );
    }

    /// End the call with one peer.
    pub fn hang_up(&self, remote: &PeerId) {
        self.inner.conman.send(
            remote,
            &Envelope::CustomEvent {
                event_name: HANGUP_EVENT.to_string(),
                data: Value::Null,
            },
        );
        self.inner.mark_disconnected(remote);
    }

    /// Peers currently in a call with us.
    pub fn active_calls(&self) -> Vec<PeerId> {
        self.inner.active.lock().expect("active lock").iter().cloned().collect()
    }

    pub fn on(&self, handler: impl Fn(&VoiceEvent) + Send + Sync + 'static) -> HandlerId {
        self.inner.events.on(handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.events.off(id)
    }

    pub fn destroy(&self) {
        if let Some(handler) = self.inner.conn_handler.lock().expect("handler lock").take() {
            self.inner.conman.off(handler);
        }
        let peers: Vec<PeerId> = self.inner.active.lock().expect("active lock").drain().collect();
        for peer in peers {
            self.inner.conman.send(
                &peer,
                &Envelope::CustomEvent {
                    event_name: HANGUP_EVENT.to_string(),
                    data: Value::Null,
                },
            );
        }
    }
}

impl VoiceInner {
    fn mark_connected(&self, remote: &PeerId) {
        if self.active.lock().expect("active lock").insert(remote.clone()) {
            self.events.emit(&VoiceEvent::Connected {
                peer: remote.clone(),
            });
        }
    }

    fn mark_disconnected(&self, remote: &PeerId) {
        if self.active.lock().expect("active lock").remove(remote) {
            self.events.emit(&VoiceEvent::Disconnected {
                peer: remote.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;
    use std::time::Duration;

    async fn voice(net: &MemoryNetwork, id: &str) -> (VoiceSignaling, ConnectionManager) {
        let conman = ConnectionManager::new(Arc::new(net.clone()), Duration::from_secs(1));
        conman.open_endpoint(Some(id.to_string())).await.expect("endpoint");
        (VoiceSignaling::new(conman.clone()), conman)
    }

    #[tokio::test]
    async fn test_call_auto_accept_connects_both_sides() {
        let net = MemoryNetwork::new();
        let (caller, caller_conman) = voice(&net, "a").await;
        let (callee, _) = voice(&net, "b").await;
        caller_conman.connect(&"b".into()).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        caller.on(move |event| {
            tx.send(event.clone()).unwrap();
        });

        caller.call(&"b".into());
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no voice event")
            .unwrap();
        assert_eq!(event, VoiceEvent::Connected { peer: "b".into() });
        assert_eq!(caller.active_calls(), vec![PeerId::from("b")]);

        // The callee auto-accepted, so it sees the call too.
        let mut waited = 0;
        while callee.active_calls().is_empty() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert_eq!(callee.active_calls(), vec![PeerId::from("a")]);
    }

    #[tokio::test]
    async fn test_hang_up_disconnects_both_sides() {
        let net = MemoryNetwork::new();
        let (caller, caller_conman) = voice(&net, "a").await;
        let (callee, _) = voice(&net, "b").await;
        caller_conman.connect(&"b".into()).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        callee.on(move |event| {
            tx.send(event.clone()).unwrap();
        });

        caller.call(&"b".into());
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no voice event")
            .unwrap();
        assert_eq!(event, VoiceEvent::Connected { peer: "a".into() });

        caller.hang_up(&"b".into());
        assert!(caller.active_calls().is_empty());
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no voice event")
            .unwrap();
        assert_eq!(event, VoiceEvent::Disconnected { peer: "a".into() });
        assert!(callee.active_calls().is_empty());
    }
}
