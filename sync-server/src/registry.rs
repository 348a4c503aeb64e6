//! Live connections and the identities attached to them.
//!
//! Every admitted connection has exactly one [`Identity`] and one outbound
//! queue. Names are unique among connected identities, compared
//! case-insensitively. Handshake validation and insertion happen under the
//! same lock, so two clients racing for one name cannot both get in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use sync_types::{ConnectionId, HandshakeRequest, HandshakeResponse, Identity, Message, ServerPolicy};

use crate::handshake::{authenticate, Credentials};

/// Item on a connection's outbound command queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Write this message.
    Message(Message),
    /// Send `Bye` and close the connection.
    Close {
        /// Reason sent with `Bye`.
        reason: String,
    },
}

/// Sender half of a connection's bounded outbound command queue.
///
/// Sends never wait. When the queue is full the item is dropped and the
/// overflow signal fires; the session then closes the connection, since a
/// peer that cannot keep up has already missed commands.
#[derive(Debug, Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    overflow: Arc<Notify>,
}

/// Receiver half of a connection's outbound command queue.
pub type OutboundReceiver = mpsc::Receiver<Outbound>;

/// Create an outbound queue holding at most `depth` items.
pub fn outbound_queue(depth: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (
        OutboundSender {
            tx,
            overflow: Arc::new(Notify::new()),
        },
        rx,
    )
}

impl OutboundSender {
    /// Queue an item without waiting.
    pub fn send(&self, item: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.tx.try_send(item).map_err(|e| {
            if matches!(e, TrySendError::Full(_)) {
                self.overflow.notify_one();
            }
            e
        })
    }

    /// Fires once the queue has overflowed. Holding it does not keep the
    /// queue open.
    pub fn overflow_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }
}

struct Entry {
    identity: Identity,
    outbound: OutboundSender,
}

/// Result of [`SessionRegistry::admit`].
#[derive(Debug)]
pub struct Admission {
    /// Response to send to the client.
    pub response: HandshakeResponse,
    /// The admitted identity, if accepted.
    pub identity: Option<Identity>,
    /// Identities connected before this one (empty on rejection).
    pub others: Vec<Identity>,
}

/// Maps connections to identities.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate a handshake and register the connection in one step.
    pub fn admit(
        &self,
        connection: ConnectionId,
        request: &HandshakeRequest,
        credentials: &Credentials,
        server_version: &str,
        policy: &ServerPolicy,
        outbound: OutboundSender,
    ) -> Admission {
        let mut entries = self.lock();

        if entries.contains_key(&connection) {
            return Admission {
                response: HandshakeResponse::error("Connection already identified"),
                identity: None,
                others: Vec::new(),
            };
        }

        let (response, identity) =
            authenticate(request, credentials, server_version, policy, |name| {
                entries.values().any(|e| same_name(&e.identity.name, name))
            });

        let Some(identity) = identity else {
            return Admission {
                response,
                identity: None,
                others: Vec::new(),
            };
        };

        let mut others: Vec<Identity> = entries.values().map(|e| e.identity.clone()).collect();
        others.sort_by(|a, b| a.name.cmp(&b.name));
        entries.insert(
            connection,
            Entry {
                identity: identity.clone(),
                outbound,
            },
        );
        Admission {
            response,
            identity: Some(identity),
            others,
        }
    }

    /// Register an already authenticated identity.
    ///
    /// Returns `false` (and changes nothing) if the connection already has
    /// an identity or the name is taken.
    pub fn register(
        &self,
        connection: ConnectionId,
        identity: Identity,
        outbound: OutboundSender,
    ) -> bool {
        let mut entries = self.lock();
        if entries.contains_key(&connection)
            || entries
                .values()
                .any(|e| same_name(&e.identity.name, &identity.name))
        {
            return false;
        }
        entries.insert(connection, Entry { identity, outbound });
        true
    }

    /// Remove a connection. Returns its identity if it was registered.
    pub fn unregister(&self, connection: ConnectionId) -> Option<Identity> {
        self.lock().remove(&connection).map(|e| e.identity)
    }

    /// Identity holding `name`, if connected.
    pub fn lookup_by_name(&self, name: &str) -> Option<Identity> {
        self.lock()
            .values()
            .find(|e| same_name(&e.identity.name, name))
            .map(|e| e.identity.clone())
    }

    /// Connection of the identity holding `name`, if connected.
    pub fn lookup_connection_id(&self, name: &str) -> Option<ConnectionId> {
        self.lock()
            .iter()
            .find(|(_, e)| same_name(&e.identity.name, name))
            .map(|(id, _)| *id)
    }

    /// Identity attached to a connection.
    pub fn identity_of(&self, connection: ConnectionId) -> Option<Identity> {
        self.lock().get(&connection).map(|e| e.identity.clone())
    }

    /// Every connected identity, sorted by name.
    pub fn all(&self) -> Vec<Identity> {
        let mut all: Vec<Identity> = self.lock().values().map(|e| e.identity.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Outbound queue of a connection.
    pub fn outbound(&self, connection: ConnectionId) -> Option<OutboundSender> {
        self.lock().get(&connection).map(|e| e.outbound.clone())
    }

    /// Queue a message for one connection. Returns `false` if it is gone.
    pub fn send_to(&self, connection: ConnectionId, message: Message) -> bool {
        match self.lock().get(&connection) {
            Some(entry) => entry.outbound.send(Outbound::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Queue a message for every connection except `sender`. Returns how
    /// many queues accepted it.
    pub fn broadcast_except(&self, sender: ConnectionId, message: &Message) -> usize {
        self.lock()
            .iter()
            .filter(|(id, _)| **id != sender)
            .filter(|(_, e)| e.outbound.send(Outbound::Message(message.clone())).is_ok())
            .count()
    }

    /// Ask a connection to send `Bye` and close.
    pub fn kick(&self, connection: ConnectionId, reason: impl Into<String>) -> bool {
        match self.lock().get(&connection) {
            Some(entry) => entry
                .outbound
                .send(Outbound::Close {
                    reason: reason.into(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Ask every connection to close.
    pub fn kick_all(&self, reason: &str) {
        for entry in self.lock().values() {
            let _ = entry.outbound.send(Outbound::Close {
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_types::{Role, PROTOCOL_VERSION};

    fn admit(
        registry: &SessionRegistry,
        conn: u64,
        name: &str,
    ) -> (Admission, OutboundReceiver) {
        let (tx, rx) = outbound_queue(16);
        let admission = registry.admit(
            ConnectionId::new(conn),
            &HandshakeRequest::new(name, None, Role::Player),
            &Credentials::default(),
            PROTOCOL_VERSION,
            &ServerPolicy::default(),
            tx,
        );
        (admission, rx)
    }

    #[test]
    fn admit_then_lookup() {
        let registry = SessionRegistry::new();
        let (a, _rx) = admit(&registry, 1, "Alice");
        assert!(a.response.is_ok());
        assert!(a.others.is_empty());

        let (b, _rx2) = admit(&registry, 2, "Bob");
        assert_eq!(b.others, vec![Identity::new("Alice", Role::Player)]);

        assert_eq!(registry.lookup_connection_id("bob"), Some(ConnectionId::new(2)));
        assert_eq!(registry.lookup_by_name("ALICE").unwrap().name, "Alice");
        assert_eq!(registry.all().len(), 2);
    }

    #[test]
    fn duplicate_name_rejected_case_insensitive() {
        let registry = SessionRegistry::new();
        let (_a, _rx) = admit(&registry, 1, "Bob");
        let (b, _rx2) = admit(&registry, 2, "bOB");
        assert!(!b.response.is_ok());
        assert!(b.identity.is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn one_identity_per_connection() {
        let registry = SessionRegistry::new();
        let (_a, _rx) = admit(&registry, 1, "Bob");
        let (again, _rx2) = admit(&registry, 1, "Robert");
        assert!(!again.response.is_ok());
        assert_eq!(registry.identity_of(ConnectionId::new(1)).unwrap().name, "Bob");

        let (tx, _rx3) = outbound_queue(16);
        assert!(!registry.register(
            ConnectionId::new(1),
            Identity::new("Other", Role::Player),
            tx
        ));
    }

    #[test]
    fn concurrent_admits_for_one_name_admit_exactly_one() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (tx, rx) = outbound_queue(16);
                    let admission = registry.admit(
                        ConnectionId::new(i),
                        &HandshakeRequest::new("Bob", None, Role::Player),
                        &Credentials::default(),
                        PROTOCOL_VERSION,
                        &ServerPolicy::default(),
                        tx,
                    );
                    drop(rx);
                    admission.response.is_ok()
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_skips_sender() {
        let registry = SessionRegistry::new();
        let (_a, mut rx_a) = admit(&registry, 1, "A");
        let (_b, mut rx_b) = admit(&registry, 2, "B");
        let (_c, mut rx_c) = admit(&registry, 3, "C");

        let msg = Message::Bye {
            reason: "test".into(),
        };
        assert_eq!(registry.broadcast_except(ConnectionId::new(1), &msg), 2);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Message(_))));
        assert!(matches!(rx_c.try_recv(), Ok(Outbound::Message(_))));
    }

    #[test]
    fn unregister_frees_name() {
        let registry = SessionRegistry::new();
        let (_a, _rx) = admit(&registry, 1, "Bob");
        assert_eq!(
            registry.unregister(ConnectionId::new(1)).map(|i| i.name),
            Some("Bob".to_string())
        );
        assert!(registry.unregister(ConnectionId::new(1)).is_none());
        let (again, _rx2) = admit(&registry, 2, "Bob");
        assert!(again.response.is_ok());
    }

    #[test]
    fn kick_queues_close() {
        let registry = SessionRegistry::new();
        let (_a, mut rx) = admit(&registry, 1, "Bob");
        assert!(registry.kick(ConnectionId::new(1), "booted"));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close { reason }) if reason == "booted"));
        assert!(!registry.kick(ConnectionId::new(9), "nobody"));
    }

    #[tokio::test]
    async fn full_queue_drops_and_signals_overflow() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = outbound_queue(2);
        let overflow = tx.overflow_signal();
        assert!(registry.register(
            ConnectionId::new(1),
            Identity::new("Slow", Role::Player),
            tx
        ));

        let msg = |n: usize| Message::Bye {
            reason: format!("{n}"),
        };
        assert!(registry.send_to(ConnectionId::new(1), msg(1)));
        assert!(registry.send_to(ConnectionId::new(1), msg(2)));
        assert!(!registry.send_to(ConnectionId::new(1), msg(3)));

        tokio::time::timeout(std::time::Duration::from_secs(1), overflow.notified())
            .await
            .unwrap();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(m)) if m == msg(1)));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Message(m)) if m == msg(2)));
        assert!(rx.try_recv().is_err());
    }
}
