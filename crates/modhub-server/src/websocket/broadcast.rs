//! Fan-out and point-to-point delivery.

use std::sync::Arc;

use metrics::counter;
use modhub_core::HubError;
use tracing::{debug, warn};

use crate::hub::registry::ConnectionRegistry;
use crate::metrics::HUB_BROADCAST_DROPS_TOTAL;

/// Delivers frames to connections known to the registry.
///
/// Every send is a non-blocking enqueue. A full or closed queue drops the frame
/// for that one receiver and delivery carries on.
pub struct BroadcastManager {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastManager {
    /// Create a broadcast manager over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Send `text` to every connection in the current snapshot.
    ///
    /// Returns how many receivers accepted it.
    pub fn broadcast_all(&self, text: &str) -> usize {
        let recipients = self.registry.snapshot();
        let frame = Arc::new(text.to_owned());
        let mut delivered = 0;
        for conn in &recipients {
            if conn.send(frame.clone()) {
                delivered += 1;
            } else {
                counter!(HUB_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(
                    connection_id = %conn.id,
                    module = %conn.identity,
                    dropped = conn.drop_count(),
                    "failed to enqueue broadcast"
                );
            }
        }
        debug!(recipients = recipients.len(), delivered, "broadcast to all");
        delivered
    }

    /// Forward `text` unchanged to the connection addressed as `to`.
    pub fn forward(&self, to: &str, text: &str) -> Result<(), HubError> {
        let offline = || HubError::ModuleOffline {
            module: to.to_owned(),
        };
        let target = self.registry.resolve(to).ok_or_else(offline)?;
        if target.send_text(text.to_owned()) {
            debug!(to, connection_id = %target.id, "forwarded message");
            Ok(())
        } else {
            counter!(HUB_BROADCAST_DROPS_TOTAL).increment(1);
            warn!(
                to,
                connection_id = %target.id,
                dropped = target.drop_count(),
                "failed to enqueue forwarded message"
            );
            Err(offline())
        }
    }

    /// Number of connections in the broadcast set.
    pub fn connection_count(&self) -> usize {
        self.registry.snapshot().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::ModuleConnection;
    use modhub_core::ConnectionId;
    use tokio::sync::mpsc;

    fn attach(
        registry: &ConnectionRegistry,
        identity: &str,
        capacity: usize,
    ) -> (Arc<ModuleConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Arc::new(ModuleConnection::new(ConnectionId::new(), identity.into(), tx));
        registry.attach(conn.clone()).unwrap();
        let _ = registry.confirm(&conn.id).unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_a, mut ra) = attach(&registry, "a", 4);
        let (_b, mut rb) = attach(&registry, "b", 4);
        let bm = BroadcastManager::new(registry);

        assert_eq!(bm.broadcast_all("hello"), 2);
        assert_eq!(&*ra.recv().await.unwrap(), "hello");
        assert_eq!(&*rb.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn dead_receiver_does_not_stop_fan_out() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_a, ra) = attach(&registry, "a", 4);
        let (_b, mut rb) = attach(&registry, "b", 4);
        let (c, _rc) = attach(&registry, "c", 1);
        assert!(c.send_text("fill".into()));
        drop(ra);
        let bm = BroadcastManager::new(registry);

        assert_eq!(bm.broadcast_all("evt"), 1);
        assert_eq!(&*rb.recv().await.unwrap(), "evt");
        assert_eq!(c.drop_count(), 1);
    }

    #[tokio::test]
    async fn pending_connection_gets_no_broadcast() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_a, mut ra) = attach(&registry, "a", 4);
        let (tx, mut rp) = mpsc::channel(4);
        let pending = Arc::new(ModuleConnection::new(ConnectionId::new(), "b".into(), tx));
        registry.attach(pending).unwrap();
        let bm = BroadcastManager::new(registry);

        assert_eq!(bm.broadcast_all("evt"), 1);
        assert_eq!(&*ra.recv().await.unwrap(), "evt");
        assert!(rp.try_recv().is_err());
        assert!(bm.forward("b", "{}").is_err());
    }

    #[test]
    fn broadcast_with_no_connections() {
        let bm = BroadcastManager::new(Arc::new(ConnectionRegistry::new(8)));
        assert_eq!(bm.broadcast_all("x"), 0);
        assert_eq!(bm.connection_count(), 0);
    }

    #[tokio::test]
    async fn forward_delivers_verbatim() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_b, mut rb) = attach(&registry, "b", 4);
        let bm = BroadcastManager::new(registry);

        let raw = r#"{"origin":"a","signed_msg":"AAAA","resolve_id":"r1"}"#;
        bm.forward("b", raw).unwrap();
        assert_eq!(&*rb.recv().await.unwrap(), raw);
    }

    #[test]
    fn forward_to_absent_is_offline() {
        let bm = BroadcastManager::new(Arc::new(ConnectionRegistry::new(8)));
        let err = bm.forward("ghost", "{}").unwrap_err();
        assert_eq!(err.reason(), "module_offline");
    }

    #[test]
    fn forward_to_closed_queue_is_offline() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_b, rb) = attach(&registry, "b", 4);
        drop(rb);
        let bm = BroadcastManager::new(registry);
        assert!(bm.forward("b", "{}").is_err());
    }
}
