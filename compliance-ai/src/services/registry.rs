//! Connection Registry
//!
//! Live notification sockets per user. Each socket is represented by the sending half of an
//! unbounded channel; the socket's own writer task drains the other half. Delivery is
//! best-effort and at most once per connected socket: a user with no live socket simply
//! misses the message.

use compliance_common::events::{Notification, SubjectKind};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Serialized frame shared by every socket it is delivered to
pub type Frame = Arc<str>;

type UserSockets = HashMap<Uuid, mpsc::UnboundedSender<Frame>>;

/// Sockets of every connected user on one relay
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, UserSockets>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket for `user_id`
    ///
    /// Returns the connection ID to unregister with and the receiver the socket's
    /// writer drains.
    pub async fn register(&self, user_id: &str) -> (Uuid, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();

        let mut connections = self.connections.write().await;
        connections
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id, tx);

        debug!(user_id, %connection_id, "Socket registered");
        (connection_id, rx)
    }

    /// Remove one socket; the user's entry is pruned once empty
    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(sockets) = connections.get_mut(user_id) {
            sockets.remove(&connection_id);
            if sockets.is_empty() {
                connections.remove(user_id);
            }
        }
        debug!(user_id, %connection_id, "Socket unregistered");
    }

    /// Send `notification` to every open socket of `user_id`
    ///
    /// Serializes once. Closed sockets are skipped, not removed; their own close path
    /// unregisters them. Returns the number of sockets written to.
    pub async fn deliver(&self, user_id: &str, notification: &Notification) -> usize {
        let connections = self.connections.read().await;
        let Some(sockets) = connections.get(user_id) else {
            debug!(user_id, event = notification.event_type(), "No live socket; dropped");
            return 0;
        };

        let frame: Frame = match notification.to_frame() {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!(user_id, error = %e, "Failed to serialize notification");
                return 0;
            }
        };

        sockets
            .values()
            .filter(|tx| tx.send(Arc::clone(&frame)).is_ok())
            .count()
    }

    /// Live sockets for `user_id`
    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(user_id)
            .map_or(0, |sockets| sockets.len())
    }

    /// Users with at least one live socket
    pub async fn user_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// Notification socket endpoint, `/ws/{relay}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relay {
    Frameworks,
    ExpertFrameworks,
    Comparisons,
}

impl Relay {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relay::Frameworks => "frameworks",
            Relay::ExpertFrameworks => "expert-frameworks",
            Relay::Comparisons => "comparisons",
        }
    }

    /// Relay carrying framework updates of a subject kind
    pub fn for_subject(kind: SubjectKind) -> Self {
        match kind {
            SubjectKind::User => Relay::Frameworks,
            SubjectKind::Expert => Relay::ExpertFrameworks,
        }
    }
}

impl FromStr for Relay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "frameworks" => Ok(Relay::Frameworks),
            "expert-frameworks" => Ok(Relay::ExpertFrameworks),
            "comparisons" => Ok(Relay::Comparisons),
            other => Err(format!("Unknown relay: {}", other)),
        }
    }
}

/// One registry per relay
#[derive(Clone, Default)]
pub struct RelayHub {
    frameworks: ConnectionRegistry,
    expert_frameworks: ConnectionRegistry,
    comparisons: ConnectionRegistry,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self, relay: Relay) -> &ConnectionRegistry {
        match relay {
            Relay::Frameworks => &self.frameworks,
            Relay::ExpertFrameworks => &self.expert_frameworks,
            Relay::Comparisons => &self.comparisons,
        }
    }

    pub async fn deliver(&self, relay: Relay, user_id: &str, notification: &Notification) -> usize {
        self.registry(relay).deliver(user_id, notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivery_reaches_every_socket_of_user() {
        let registry = ConnectionRegistry::new();
        let (_, mut tab1) = registry.register("alice").await;
        let (_, mut tab2) = registry.register("alice").await;
        let (_, mut other) = registry.register("bob").await;

        let delivered = registry.deliver("alice", &Notification::connected()).await;
        assert_eq!(delivered, 2);

        let frame = tab1.recv().await.unwrap();
        assert!(frame.contains("\"type\":\"connection\""));
        assert_eq!(tab2.recv().await.unwrap(), frame);
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_socket_means_dropped() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.deliver("alice", &Notification::connected()).await, 0);

        // Connecting later does not replay what was missed
        let (_, mut rx) = registry.register("alice").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_prunes_empty_user() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = registry.register("alice").await;
        let (second, mut rx2) = registry.register("alice").await;

        registry.unregister("alice", first).await;
        assert_eq!(registry.connection_count("alice").await, 1);
        assert_eq!(registry.deliver("alice", &Notification::connected()).await, 1);
        assert!(rx2.recv().await.is_some());

        registry.unregister("alice", second).await;
        assert_eq!(registry.connection_count("alice").await, 0);
        assert_eq!(registry.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_socket_skipped_not_removed() {
        let registry = ConnectionRegistry::new();
        let (_, rx1) = registry.register("alice").await;
        let (_, mut rx2) = registry.register("alice").await;
        drop(rx1);

        assert_eq!(registry.deliver("alice", &Notification::connected()).await, 1);
        assert_eq!(registry.connection_count("alice").await, 2);
        assert!(rx2.recv().await.is_some());
    }

    #[test]
    fn test_relay_names() {
        for relay in [Relay::Frameworks, Relay::ExpertFrameworks, Relay::Comparisons] {
            assert_eq!(relay.as_str().parse::<Relay>().unwrap(), relay);
        }
        assert!("admin".parse::<Relay>().is_err());
        assert_eq!(Relay::for_subject(SubjectKind::Expert), Relay::ExpertFrameworks);
    }
}
