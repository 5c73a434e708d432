use shared::models::ConnectionId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingParticipant {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub enqueued_at: Instant,
}

/// Outcome of popping the two oldest queue entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    /// Both entries were live; the first one popped is the initiator.
    Matched {
        initiator: WaitingParticipant,
        responder: WaitingParticipant,
    },
    /// At least one entry had no live registration left. A live survivor is
    /// put back at the head of the queue.
    RaceDrop {
        vanished: Vec<ConnectionId>,
        requeued: Option<ConnectionId>,
    },
}

/// Connections waiting for a partner, paired strictly oldest-first.
#[derive(Debug, Default)]
pub struct PresenceQueue {
    waiting: HashMap<ConnectionId, WaitingParticipant>,
    order: VecDeque<ConnectionId>,
}

impl PresenceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the participant at the back of the queue, replacing any
    /// earlier registration of the same connection.
    pub fn enqueue(&mut self, participant: WaitingParticipant) {
        self.remove(&participant.connection_id);
        self.order.push_back(participant.connection_id);
        self.waiting
            .insert(participant.connection_id, participant);
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<WaitingParticipant> {
        let removed = self.waiting.remove(connection_id);
        self.order.retain(|queued| queued != connection_id);
        removed
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.waiting.contains_key(connection_id)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&WaitingParticipant> {
        self.waiting.get(connection_id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Queued connection ids, oldest first.
    pub fn queued_ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.order.iter()
    }

    /// Pops the two oldest entries. Returns `None` while fewer than two
    /// entries are queued.
    pub fn next_pair(&mut self) -> Option<Pairing> {
        if self.order.len() < 2 {
            return None;
        }
        let first = self.order.pop_front()?;
        let second = self.order.pop_front()?;

        match (self.waiting.remove(&first), self.waiting.remove(&second)) {
            (Some(initiator), Some(responder)) => Some(Pairing::Matched {
                initiator,
                responder,
            }),
            (Some(survivor), None) => Some(self.requeue_survivor(survivor, vec![second])),
            (None, Some(survivor)) => Some(self.requeue_survivor(survivor, vec![first])),
            (None, None) => Some(Pairing::RaceDrop {
                vanished: vec![first, second],
                requeued: None,
            }),
        }
    }

    fn requeue_survivor(
        &mut self,
        survivor: WaitingParticipant,
        vanished: Vec<ConnectionId>,
    ) -> Pairing {
        let requeued = survivor.connection_id;
        self.order.push_front(requeued);
        self.waiting.insert(requeued, survivor);
        Pairing::RaceDrop {
            vanished,
            requeued: Some(requeued),
        }
    }

    /// Evicts every participant that has waited at least `max_wait`, plus any
    /// queue slot that lost its registration. Returns the evicted participants.
    pub fn prune_stale(&mut self, now: Instant, max_wait: Duration) -> Vec<WaitingParticipant> {
        let stale: Vec<ConnectionId> = self
            .waiting
            .values()
            .filter(|p| now.saturating_duration_since(p.enqueued_at) >= max_wait)
            .map(|p| p.connection_id)
            .collect();

        let mut evicted: Vec<WaitingParticipant> = stale
            .iter()
            .filter_map(|id| self.waiting.remove(id))
            .collect();
        evicted.sort_by_key(|p| p.enqueued_at);

        let waiting = &self.waiting;
        self.order.retain(|id| waiting.contains_key(id));
        evicted
    }
}
