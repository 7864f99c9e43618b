// Connection registry and broadcast fan-out.
//
// A single dispatcher task owns the registry; register, unregister and
// broadcast are requests queued to it, so registry reads and writes never race
// and broadcast order equals the order requests reach the dispatcher.

use super::stats::RelayStats;
use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Sending half of a connection's private outbound queue.
pub type OutboundTx = mpsc::Sender<Utf8Bytes>;

/// The dispatcher task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubClosed;

impl fmt::Display for HubClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("hub dispatcher closed")
    }
}

impl std::error::Error for HubClosed {}

#[derive(Debug)]
enum HubCommand {
    Register {
        conn_id: ConnectionId,
        outbound: OutboundTx,
    },
    Unregister {
        conn_id: ConnectionId,
    },
    Broadcast {
        message: Utf8Bytes,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the dispatcher.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawns the dispatcher on the current runtime.
    pub fn spawn(command_capacity: usize, stats: Arc<RelayStats>) -> Self {
        let (tx, rx) = mpsc::channel(command_capacity);
        tokio::spawn(hub_task(rx, stats));
        Self { tx }
    }

    /// Adds a connection. Broadcasts requested after this returns reach it.
    pub async fn register(
        &self,
        conn_id: ConnectionId,
        outbound: OutboundTx,
    ) -> Result<(), HubClosed> {
        self.send(HubCommand::Register { conn_id, outbound }).await
    }

    /// Removes a connection and closes its outbound queue. Safe to repeat.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Result<(), HubClosed> {
        self.send(HubCommand::Unregister { conn_id }).await
    }

    /// Queues `message` for every connection registered when the dispatcher handles it.
    pub async fn broadcast(&self, message: Utf8Bytes) -> Result<(), HubClosed> {
        self.send(HubCommand::Broadcast { message }).await
    }

    pub async fn connection_count(&self) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count { reply }).await?;
        rx.await.map_err(|_| HubClosed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubClosed> {
        self.tx.send(command).await.map_err(|_| HubClosed)
    }
}

async fn hub_task(mut rx: mpsc::Receiver<HubCommand>, stats: Arc<RelayStats>) {
    let mut connections: HashMap<ConnectionId, OutboundTx> = HashMap::new();
    // Reused between broadcasts to avoid reallocating on every fan-out.
    let mut slow: Vec<ConnectionId> = Vec::new();
    let mut gone: Vec<ConnectionId> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Register { conn_id, outbound } => {
                if connections.insert(conn_id, outbound).is_some() {
                    warn!(conn_id, "connection registered twice; replacing queue");
                }
                debug!(conn_id, connections = connections.len(), "connection registered");
            }
            HubCommand::Unregister { conn_id } => {
                // Dropping the sender closes the queue so the outbound pump exits.
                if connections.remove(&conn_id).is_some() {
                    debug!(conn_id, connections = connections.len(), "connection unregistered");
                }
            }
            HubCommand::Broadcast { message } => {
                for (conn_id, outbound) in &connections {
                    match outbound.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(conn_id, "outbound queue full; evicting slow peer");
                            slow.push(*conn_id);
                        }
                        // Writer already exited; its teardown will unregister it too.
                        Err(TrySendError::Closed(_)) => {
                            debug!(conn_id, "outbound queue closed; dropping peer");
                            gone.push(*conn_id);
                        }
                    }
                }

                for conn_id in slow.drain(..) {
                    connections.remove(&conn_id);
                    stats.peer_evicted();
                }
                for conn_id in gone.drain(..) {
                    connections.remove(&conn_id);
                }
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(connections.len());
            }
        }
    }

    debug!("hub command channel closed; dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub() -> (Hub, Arc<RelayStats>) {
        let stats = Arc::new(RelayStats::default());
        (Hub::spawn(64, stats.clone()), stats)
    }

    #[tokio::test]
    async fn when_broadcasting_then_every_registered_connection_gets_the_exact_bytes() {
        let (hub, _) = hub();
        let (a_tx, mut a_rx) = mpsc::channel(8);
        let (b_tx, mut b_rx) = mpsc::channel(8);
        hub.register(1, a_tx).await.unwrap();
        hub.register(2, b_tx).await.unwrap();

        hub.broadcast(Utf8Bytes::from_static(r#"{"type":"idle"}"#))
            .await
            .unwrap();

        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"type":"idle"}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"type":"idle"}"#);
    }

    #[tokio::test]
    async fn when_connection_registers_after_broadcast_then_it_never_sees_it() {
        let (hub, _) = hub();
        let (early_tx, mut early_rx) = mpsc::channel(8);
        let (late_tx, mut late_rx) = mpsc::channel(8);
        hub.register(1, early_tx).await.unwrap();

        hub.broadcast(Utf8Bytes::from_static("first")).await.unwrap();
        hub.register(2, late_tx).await.unwrap();
        hub.broadcast(Utf8Bytes::from_static("second")).await.unwrap();

        assert_eq!(early_rx.recv().await.unwrap().as_str(), "first");
        assert_eq!(early_rx.recv().await.unwrap().as_str(), "second");
        assert_eq!(late_rx.recv().await.unwrap().as_str(), "second");
        assert!(late_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn when_peer_queue_is_full_then_it_is_evicted_and_others_keep_receiving() {
        let (hub, stats) = hub();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        hub.register(1, slow_tx).await.unwrap();
        hub.register(2, fast_tx).await.unwrap();

        for i in 0..5 {
            hub.broadcast(Utf8Bytes::from(format!("m{i}"))).await.unwrap();
        }

        for i in 0..5 {
            let msg = timeout(Duration::from_secs(1), fast_rx.recv())
                .await
                .expect("healthy peer should not be delayed")
                .unwrap();
            assert_eq!(msg.as_str(), format!("m{i}"));
        }

        // The slow peer keeps what fit, then sees its queue closed.
        assert_eq!(slow_rx.recv().await.unwrap().as_str(), "m0");
        assert!(slow_rx.recv().await.is_none());
        assert_eq!(hub.connection_count().await.unwrap(), 1);
        assert_eq!(stats.snapshot().peers_evicted, 1);
    }

    #[tokio::test]
    async fn when_unregistered_twice_then_second_call_is_a_no_op() {
        let (hub, _) = hub();
        let (tx, mut rx) = mpsc::channel(8);
        hub.register(7, tx).await.unwrap();

        hub.unregister(7).await.unwrap();
        hub.unregister(7).await.unwrap();

        assert!(rx.recv().await.is_none());
        assert_eq!(hub.connection_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn when_peer_dropped_its_queue_then_broadcast_removes_it_without_counting_an_eviction() {
        let (hub, stats) = hub();
        let (tx, rx) = mpsc::channel(8);
        hub.register(3, tx).await.unwrap();
        drop(rx);

        hub.broadcast(Utf8Bytes::from_static("ping")).await.unwrap();

        assert_eq!(hub.connection_count().await.unwrap(), 0);
        assert_eq!(stats.snapshot().peers_evicted, 0);
    }
}
