// Single-owner task for the authoritative world.
//
// Every mutation arrives as a command on one channel, so the units mapping is
// only ever touched by this task. The task is also the sequencing point for
// the hub: a frame is handed to the hub in the same step its event is applied,
// and joins/leaves register with the hub in that same order. A new replica's
// Init snapshot therefore lines up exactly with the first frame it is queued.

use super::hub::{ConnectionId, Hub, OutboundTx};
use super::stats::RelayStats;
use crate::domain::{Event, StateError, Unit, Units, World};
// Encoding here is a layering shortcut; the task needs bytes for Connect/Disconnect.
use crate::interface_adapters::protocol::encode;
use axum::extract::ws::Utf8Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

/// The world task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldClosed;

impl fmt::Display for WorldClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("world task closed")
    }
}

impl std::error::Error for WorldClosed {}

/// A freshly spawned unit plus the world as it looked right after the spawn.
#[derive(Debug, Clone)]
pub struct JoinedUnit {
    pub unit: Unit,
    pub snapshot: Units,
}

#[derive(Debug)]
enum WorldCommand {
    Relay {
        event: Event,
        frame: Utf8Bytes,
    },
    Join {
        conn_id: ConnectionId,
        outbound: OutboundTx,
        reply: oneshot::Sender<JoinedUnit>,
    },
    Leave {
        conn_id: ConnectionId,
        unit_id: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Units>,
    },
}

/// Cloneable request handle for the world task.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    tx: mpsc::Sender<WorldCommand>,
}

impl WorldHandle {
    /// Spawns the task that owns `world` for the rest of the process.
    pub fn spawn(
        world: World,
        hub: Hub,
        command_capacity: usize,
        report_interval: Duration,
        stats: Arc<RelayStats>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(command_capacity);
        tokio::spawn(world_task(rx, world, hub, report_interval, stats));
        Self { tx }
    }

    /// Forwards `frame` to every connection and applies its decoded `event`.
    pub async fn relay(&self, event: Event, frame: Utf8Bytes) -> Result<(), WorldClosed> {
        self.send(WorldCommand::Relay { event, frame }).await
    }

    /// Spawns a unit for a new connection, registers the connection with the
    /// hub and broadcasts the unit's Connect event.
    pub async fn join(
        &self,
        conn_id: ConnectionId,
        outbound: OutboundTx,
    ) -> Result<JoinedUnit, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Join {
            conn_id,
            outbound,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WorldClosed)
    }

    /// Unregisters the connection and removes its unit. A Disconnect event is
    /// broadcast only if the unit was still present; returns whether it was.
    pub async fn leave(&self, conn_id: ConnectionId, unit_id: String) -> Result<bool, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Leave {
            conn_id,
            unit_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| WorldClosed)
    }

    pub async fn snapshot(&self) -> Result<Units, WorldClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(WorldCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| WorldClosed)
    }

    async fn send(&self, command: WorldCommand) -> Result<(), WorldClosed> {
        self.tx.send(command).await.map_err(|_| WorldClosed)
    }
}

async fn world_task(
    mut rx: mpsc::Receiver<WorldCommand>,
    mut world: World,
    hub: Hub,
    report_interval: Duration,
    stats: Arc<RelayStats>,
) {
    info!(
        authoritative = world.is_authoritative(),
        units = world.len(),
        "world task started"
    );
    let mut report = interval_at(Instant::now() + report_interval, report_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    debug!("world command channel closed; world task exiting");
                    break;
                };
                handle_command(&mut world, &hub, &stats, command).await;
            }
            _ = report.tick() => {
                let snapshot = stats.snapshot();
                info!(
                    units = world.len(),
                    connections = snapshot.connections_live,
                    frames_forwarded = snapshot.frames_forwarded,
                    frames_dropped = snapshot.frames_dropped,
                    frames_rejected = snapshot.frames_rejected,
                    peers_evicted = snapshot.peers_evicted,
                    "units in the world"
                );
            }
        }
    }
}

async fn handle_command(world: &mut World, hub: &Hub, stats: &RelayStats, command: WorldCommand) {
    match command {
        WorldCommand::Relay { event, frame } => {
            if hub.broadcast(frame).await.is_err() {
                error!("hub closed; frame not forwarded");
            } else {
                stats.frame_forwarded();
            }
            apply_logged(world, event);
        }
        WorldCommand::Join {
            conn_id,
            outbound,
            reply,
        } => {
            let unit = world.add_unit();
            info!(conn_id, unit_id = %unit.id, units = world.len(), "new unit added");

            if hub.register(conn_id, outbound).await.is_err() {
                error!(conn_id, "hub closed; connection not registered");
            }
            broadcast_event(hub, &Event::Connect(unit.clone())).await;

            let _ = reply.send(JoinedUnit {
                unit,
                snapshot: world.units().clone(),
            });
        }
        WorldCommand::Leave {
            conn_id,
            unit_id,
            reply,
        } => {
            // Unregister first so the leaving connection is not sent its own Disconnect.
            if hub.unregister(conn_id).await.is_err() {
                error!(conn_id, "hub closed; connection not unregistered");
            }

            let removed = world
                .apply_event(Event::Disconnect {
                    unit_id: unit_id.clone(),
                })
                .is_ok();
            if removed {
                info!(conn_id, unit_id = %unit_id, units = world.len(), "removing disconnected unit");
                broadcast_event(hub, &Event::Disconnect { unit_id }).await;
            } else {
                debug!(conn_id, unit_id = %unit_id, "unit already removed; no disconnect broadcast");
            }
            let _ = reply.send(removed);
        }
        WorldCommand::Snapshot { reply } => {
            let _ = reply.send(world.units().clone());
        }
    }
}

fn apply_logged(world: &mut World, event: Event) {
    let kind = event.kind();
    let unit_id = event.unit_id().map(str::to_owned);
    match world.apply_event(event) {
        Ok(()) => {}
        Err(err @ StateError::UnknownUnit { .. }) => {
            warn!(kind, unit_id = unit_id.as_deref(), error = %err, "event ignored");
        }
        Err(StateError::InitRejected) => {
            warn!("init event ignored by authoritative world");
        }
    }
}

async fn broadcast_event(hub: &Hub, event: &Event) {
    let text = match encode(event) {
        Ok(text) => text,
        Err(e) => {
            error!(kind = event.kind(), error = ?e, "failed to serialize event");
            return;
        }
    };
    if hub.broadcast(Utf8Bytes::from(text)).await.is_err() {
        error!(kind = event.kind(), "hub closed; event not broadcast");
    }
}
