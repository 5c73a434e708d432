use shared::models::{ConnectionId, SessionId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: SessionId,
    /// Initiator of the handshake.
    pub participant_a: ConnectionId,
    pub participant_b: ConnectionId,
    pub created_at: Instant,
    pub status: SessionStatus,
}

impl SessionRecord {
    pub fn participants(&self) -> [ConnectionId; 2] {
        [self.participant_a, self.participant_b]
    }

    /// The other member, or `None` if `connection_id` is not a member.
    pub fn counterpart(&self, connection_id: &ConnectionId) -> Option<ConnectionId> {
        if self.participant_a == *connection_id {
            Some(self.participant_b)
        } else if self.participant_b == *connection_id {
            Some(self.participant_a)
        } else {
            None
        }
    }
}

/// Sessions keyed by id plus a connection -> session index. Both maps are
/// only ever changed together.
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: HashMap<SessionId, SessionRecord>,
    by_connection: HashMap<ConnectionId, SessionId>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the record unless its id is taken or a participant already
    /// belongs to a session. Returns whether it was stored.
    pub fn insert_session(&mut self, record: SessionRecord) -> bool {
        if self.sessions.contains_key(&record.session_id)
            || record.participant_a == record.participant_b
            || record
                .participants()
                .iter()
                .any(|id| self.by_connection.contains_key(id))
        {
            return false;
        }
        for id in record.participants() {
            self.by_connection.insert(id, record.session_id.clone());
        }
        self.sessions.insert(record.session_id.clone(), record);
        true
    }

    pub fn get_session(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn get_session_mut(&mut self, session_id: &SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(session_id)
    }

    pub fn contains_session(&self, session_id: &SessionId) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn session_for_connection(&self, connection_id: &ConnectionId) -> Option<&SessionRecord> {
        self.by_connection
            .get(connection_id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    pub fn remove_session(&mut self, session_id: &SessionId) -> Option<SessionRecord> {
        let record = self.sessions.remove(session_id)?;
        for id in record.participants() {
            self.by_connection.remove(&id);
        }
        Some(record)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    /// Ids of sessions still connecting after at least `timeout`.
    pub fn expired_connecting(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        let mut expired: Vec<&SessionRecord> = self
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Connecting)
            .filter(|s| now.saturating_duration_since(s.created_at) >= timeout)
            .collect();
        expired.sort_by_key(|s| s.created_at);
        expired.into_iter().map(|s| s.session_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(id: &str, a: u128, b: u128, at: Instant) -> SessionRecord {
        SessionRecord {
            session_id: SessionId::from(id),
            participant_a: Uuid::from_u128(a),
            participant_b: Uuid::from_u128(b),
            created_at: at,
            status: SessionStatus::Connecting,
        }
    }

    #[test]
    fn test_index_follows_insert_and_remove() {
        let now = Instant::now();
        let mut repo = InMemorySessionRepository::new();
        assert!(repo.insert_session(record("1", 1, 2, now)));

        let found = repo.session_for_connection(&Uuid::from_u128(2)).unwrap();
        assert_eq!(found.session_id.as_str(), "1");
        assert_eq!(
            repo.session_for_connection(&Uuid::from_u128(1)).unwrap().session_id,
            found.session_id
        );

        let removed = repo.remove_session(&SessionId::from("1")).unwrap();
        assert_eq!(removed.counterpart(&Uuid::from_u128(1)), Some(Uuid::from_u128(2)));
        assert!(repo.session_for_connection(&Uuid::from_u128(1)).is_none());
        assert!(repo.session_for_connection(&Uuid::from_u128(2)).is_none());
        assert!(repo.remove_session(&SessionId::from("1")).is_none());
    }

    #[test]
    fn test_rejects_duplicate_ids_and_busy_participants() {
        let now = Instant::now();
        let mut repo = InMemorySessionRepository::new();
        assert!(repo.insert_session(record("1", 1, 2, now)));
        assert!(!repo.insert_session(record("1", 3, 4, now)));
        assert!(!repo.insert_session(record("2", 2, 3, now)));
        assert!(!repo.insert_session(record("3", 5, 5, now)));
        assert_eq!(repo.session_count(), 1);
    }

    #[test]
    fn test_expired_connecting_skips_connected_sessions() {
        let start = Instant::now();
        let mut repo = InMemorySessionRepository::new();
        repo.insert_session(record("1", 1, 2, start));
        repo.insert_session(record("2", 3, 4, start));
        repo.get_session_mut(&SessionId::from("2")).unwrap().status = SessionStatus::Connected;

        let timeout = Duration::from_secs(30);
        assert!(repo
            .expired_connecting(start + Duration::from_secs(29), timeout)
            .is_empty());
        assert_eq!(
            repo.expired_connecting(start + Duration::from_secs(30), timeout),
            vec![SessionId::from("1")]
        );
    }

    #[test]
    fn test_counterpart_of_stranger_is_none() {
        let rec = record("1", 1, 2, Instant::now());
        assert_eq!(rec.counterpart(&Uuid::from_u128(1)), Some(Uuid::from_u128(2)));
        assert_eq!(rec.counterpart(&Uuid::from_u128(9)), None);
    }
}
