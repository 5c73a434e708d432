use crate::clock::Clock;
use crate::ids::SessionIdGenerator;
use crate::outbox::Delivery;
use crate::presence::{Pairing, PresenceQueue, WaitingParticipant};
use crate::registry::SessionRegistry;
use shared::models::{ConnectionId, IceServer, ServerEvent, SessionId, Signal};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchmakingSettings {
    pub session_timeout: Duration,
    pub queue_max_wait: Duration,
    pub ice_servers: Vec<IceServer>,
    pub max_display_name_chars: usize,
}

impl Default for MatchmakingSettings {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            queue_max_wait: Duration::from_secs(60),
            ice_servers: vec![
                IceServer::new("stun:stun.l.google.com:19302"),
                IceServer::new("stun:stun1.l.google.com:19302"),
            ],
            max_display_name_chars: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchmakingStats {
    pub waiting: usize,
    pub sessions: usize,
}

/// Presence queue and session registry behind one set of operations. Every
/// operation finishes its state changes before returning the events it
/// wants delivered.
pub struct MatchmakingService<C> {
    presence: PresenceQueue,
    registry: SessionRegistry,
    display_names: HashMap<ConnectionId, String>,
    clock: C,
    queue_max_wait: Duration,
    max_display_name_chars: usize,
}

impl<C: Clock> MatchmakingService<C> {
    pub fn new(settings: MatchmakingSettings, ids: Box<dyn SessionIdGenerator>, clock: C) -> Self {
        Self {
            presence: PresenceQueue::new(),
            registry: SessionRegistry::new(ids, settings.ice_servers, settings.session_timeout),
            display_names: HashMap::new(),
            clock,
            queue_max_wait: settings.queue_max_wait,
            max_display_name_chars: settings.max_display_name_chars,
        }
    }

    /// Puts the connection at the back of the queue, dropping whatever it
    /// was doing before, then pairs as many waiting connections as possible.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        display_name: Option<String>,
    ) -> Vec<Delivery> {
        let mut deliveries = self.leave(connection_id);

        let display_name = self.normalize_name(display_name);
        self.display_names
            .insert(connection_id, display_name.clone());
        self.presence.enqueue(WaitingParticipant {
            connection_id,
            display_name: display_name.clone(),
            enqueued_at: self.clock.now(),
        });
        info!(%connection_id, %display_name, waiting = self.presence.len(), "joined queue");

        deliveries.push(Delivery {
            to: connection_id,
            event: ServerEvent::QueueJoined,
        });
        self.drain_queue(&mut deliveries);
        deliveries
    }

    /// Removes the connection from the queue and ends its session, if any.
    /// Safe to call any number of times.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Vec<Delivery> {
        if self.presence.remove(&connection_id).is_some() {
            debug!(%connection_id, "left queue");
        }
        self.registry.teardown(&connection_id).into_iter().collect()
    }

    /// Leaves and immediately re-joins under the name used before.
    pub fn skip(&mut self, connection_id: ConnectionId) -> Vec<Delivery> {
        let display_name = self.display_names.get(&connection_id).cloned();
        let mut deliveries = self.leave(connection_id);
        deliveries.extend(self.join(connection_id, display_name));
        deliveries
    }

    /// The connection is gone for good.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<Delivery> {
        self.display_names.remove(&connection_id);
        self.leave(connection_id)
    }

    pub fn relay(
        &mut self,
        sender: ConnectionId,
        session_id: &SessionId,
        signal: Signal,
    ) -> Vec<Delivery> {
        match self
            .registry
            .relay(session_id, sender, signal, self.clock.epoch_ms())
        {
            Ok(delivery) => vec![delivery],
            Err(err) => {
                debug!(%sender, error = %err, "signal dropped");
                Vec::new()
            }
        }
    }

    /// Silently drops queue entries that waited too long. Returns who was
    /// evicted.
    pub fn sweep_queue(&mut self) -> Vec<ConnectionId> {
        let evicted = self
            .presence
            .prune_stale(self.clock.now(), self.queue_max_wait);
        for participant in &evicted {
            debug!(
                connection_id = %participant.connection_id,
                display_name = %participant.display_name,
                "evicted stale queue entry"
            );
        }
        evicted.into_iter().map(|p| p.connection_id).collect()
    }

    pub fn sweep_sessions(&mut self) -> Vec<Delivery> {
        self.registry.expire_stale(self.clock.now())
    }

    pub fn stats(&self) -> MatchmakingStats {
        MatchmakingStats {
            waiting: self.presence.len(),
            sessions: self.registry.session_count(),
        }
    }

    pub fn presence(&self) -> &PresenceQueue {
        &self.presence
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn drain_queue(&mut self, deliveries: &mut Vec<Delivery>) {
        while let Some(pairing) = self.presence.next_pair() {
            match pairing {
                Pairing::Matched {
                    initiator,
                    responder,
                } => {
                    match self.registry.create_session(
                        initiator.connection_id,
                        responder.connection_id,
                        self.clock.now(),
                    ) {
                        Ok((_, notices)) => deliveries.extend(notices),
                        Err(err) => warn!(error = %err, "could not open session"),
                    }
                }
                Pairing::RaceDrop { vanished, requeued } => {
                    debug!(?vanished, ?requeued, "dropped half-pair from queue");
                }
            }
        }
    }

    fn normalize_name(&self, display_name: Option<String>) -> String {
        let trimmed = display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME);
        trimmed.chars().take(self.max_display_name_chars).collect()
    }
}
