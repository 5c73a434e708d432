use crate::clock::Clock;
use crate::outbox::{ConnectionTable, Delivery, LoggingOutbox, Outbox};
use crate::services::MatchmakingService;
use serde::Serialize;
use shared::models::{ClientEvent, ConnectionId, ServerEvent};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Commands queued for the hub before senders have to wait.
pub const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("signaling hub has stopped")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HubStats {
    pub waiting: usize,
    pub sessions: usize,
    pub connections: usize,
}

#[derive(Debug)]
pub enum Command {
    Connect {
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
    Inbound {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    SweepQueue,
    SweepSessions,
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Handle to the hub task. Connection commands wait for room in the
/// command queue, so a flooding socket is slowed down to the hub's pace.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.tx.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Queues a sweep without waiting. A full queue skips this sweep; the
    /// next tick retries.
    fn try_send(&self, command: Command) -> Result<(), HubError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(command)) => {
                debug!(?command, "hub busy, skipping");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(HubError::Closed),
        }
    }

    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        outbound: mpsc::Sender<ServerEvent>,
    ) -> Result<(), HubError> {
        self.send(Command::Connect {
            connection_id,
            outbound,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.send(Command::Disconnect { connection_id }).await
    }

    pub async fn inbound(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), HubError> {
        self.send(Command::Inbound {
            connection_id,
            event,
        })
        .await
    }

    pub fn sweep_queue(&self) -> Result<(), HubError> {
        self.try_send(Command::SweepQueue)
    }

    pub fn sweep_sessions(&self) -> Result<(), HubError> {
        self.try_send(Command::SweepSessions)
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Starts the task that owns all matchmaking state. It runs until every
/// handle is dropped.
pub fn spawn_hub<C: Clock>(service: MatchmakingService<C>) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let hub = Hub {
        service,
        outbox: LoggingOutbox::new(ConnectionTable::new()),
        rx,
    };
    let task = tokio::spawn(hub.run());
    (HubHandle { tx }, task)
}

struct Hub<C> {
    service: MatchmakingService<C>,
    outbox: LoggingOutbox<ConnectionTable>,
    rx: mpsc::Receiver<Command>,
}

impl<C: Clock> Hub<C> {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        info!("signaling hub stopped");
    }

    fn handle(&mut self, command: Command) {
        let deliveries = match command {
            Command::Connect {
                connection_id,
                outbound,
            } => {
                self.outbox.inner_mut().register(connection_id, outbound);
                debug!(%connection_id, connections = self.outbox.inner().len(), "connection registered");
                Vec::new()
            }
            Command::Disconnect { connection_id } => {
                let deliveries = self.service.disconnect(connection_id);
                self.outbox.inner_mut().unregister(&connection_id);
                debug!(%connection_id, connections = self.outbox.inner().len(), "connection removed");
                deliveries
            }
            Command::Inbound {
                connection_id,
                event,
            } => self.dispatch(connection_id, event),
            Command::SweepQueue => {
                let evicted = self.service.sweep_queue();
                if !evicted.is_empty() {
                    info!(evicted = evicted.len(), "pruned stale queue entries");
                }
                Vec::new()
            }
            Command::SweepSessions => self.service.sweep_sessions(),
            Command::Stats { reply } => {
                let stats = self.service.stats();
                let _ = reply.send(HubStats {
                    waiting: stats.waiting,
                    sessions: stats.sessions,
                    connections: self.outbox.inner().len(),
                });
                Vec::new()
            }
        };

        for delivery in deliveries {
            self.outbox.deliver(delivery);
        }
    }

    fn dispatch(&mut self, connection_id: ConnectionId, event: ClientEvent) -> Vec<Delivery> {
        debug!(%connection_id, event = event.name(), "inbound event");
        match event.into_signal() {
            Ok((session_id, signal)) => self.service.relay(connection_id, &session_id, signal),
            Err(ClientEvent::Join { display_name }) => self.service.join(connection_id, display_name),
            Err(ClientEvent::Skip {}) => self.service.skip(connection_id),
            Err(other) => {
                debug!(%connection_id, event = other.name(), "event has no handler");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ids::SequentialSessionIds;
    use crate::services::MatchmakingSettings;
    use serde_json::json;
    use shared::models::SessionId;
    use std::time::Duration;
    use uuid::Uuid;

    fn start(clock: ManualClock) -> HubHandle {
        let service = MatchmakingService::new(
            MatchmakingSettings::default(),
            Box::new(SequentialSessionIds::new()),
            clock,
        );
        spawn_hub(service).0
    }

    async fn connect(hub: &HubHandle, n: u128) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = Uuid::from_u128(n);
        let (tx, rx) = mpsc::channel(16);
        hub.connect(id, tx).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_pairs_and_relays_through_channels() {
        let hub = start(ManualClock::default());
        let (alice, mut alice_rx) = connect(&hub, 1).await;
        let (bob, mut bob_rx) = connect(&hub, 2).await;

        hub.inbound(alice, ClientEvent::Join { display_name: Some("Alice".into()) })
            .await
            .unwrap();
        hub.inbound(bob, ClientEvent::Join { display_name: Some("Bob".into()) })
            .await
            .unwrap();

        assert_eq!(alice_rx.recv().await.unwrap(), ServerEvent::QueueJoined);
        assert!(matches!(
            alice_rx.recv().await.unwrap(),
            ServerEvent::SessionStart { is_initiator: true, .. }
        ));
        assert_eq!(bob_rx.recv().await.unwrap(), ServerEvent::QueueJoined);
        let ServerEvent::SessionStart {
            session_id,
            is_initiator,
            ..
        } = bob_rx.recv().await.unwrap()
        else {
            panic!("expected session-start");
        };
        assert!(!is_initiator);

        hub.inbound(
            alice,
            ClientEvent::Offer {
                session_id: session_id.clone(),
                sdp: json!({"type": "offer"}),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            bob_rx.recv().await.unwrap(),
            ServerEvent::Offer {
                session_id,
                sdp: json!({"type": "offer"})
            }
        );

        hub.disconnect(bob).await.unwrap();
        assert_eq!(alice_rx.recv().await.unwrap(), ServerEvent::PeerDisconnected);
        assert_eq!(
            hub.stats().await.unwrap(),
            HubStats {
                waiting: 0,
                sessions: 0,
                connections: 1
            }
        );
    }

    #[tokio::test]
    async fn test_session_sweep_notifies_both_members() {
        let clock = ManualClock::default();
        let hub = start(clock.clone());
        let (a, mut a_rx) = connect(&hub, 1).await;
        let (b, mut b_rx) = connect(&hub, 2).await;
        hub.inbound(a, ClientEvent::Join { display_name: None }).await.unwrap();
        hub.inbound(b, ClientEvent::Join { display_name: None }).await.unwrap();

        clock.advance(Duration::from_secs(30));
        hub.sweep_sessions().unwrap();

        for rx in [&mut a_rx, &mut b_rx] {
            assert_eq!(rx.recv().await.unwrap(), ServerEvent::QueueJoined);
            assert!(matches!(rx.recv().await.unwrap(), ServerEvent::SessionStart { .. }));
            assert_eq!(rx.recv().await.unwrap(), ServerEvent::ConnectionTimeout);
        }
        assert_eq!(hub.stats().await.unwrap().sessions, 0);

        // Relaying into the expired session is a silent no-op.
        hub.inbound(
            a,
            ClientEvent::Chat {
                session_id: SessionId::from("1"),
                text: "still there?".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(hub.stats().await.unwrap().sessions, 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stops_when_all_handles_drop() {
        let service = MatchmakingService::new(
            MatchmakingSettings::default(),
            Box::new(SequentialSessionIds::new()),
            ManualClock::default(),
        );
        let (hub, task) = spawn_hub(service);
        drop(hub);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweep_requests_never_wait_on_a_full_queue() {
        let (tx, rx) = mpsc::channel(1);
        let hub = HubHandle { tx };

        hub.sweep_queue().unwrap();
        // Queue is full; the request is skipped instead of blocking.
        hub.sweep_sessions().unwrap();

        drop(rx);
        assert!(matches!(hub.sweep_queue(), Err(HubError::Closed)));
        assert!(matches!(hub.stats().await, Err(HubError::Closed)));
    }
}
