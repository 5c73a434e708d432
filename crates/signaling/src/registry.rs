use crate::ids::SessionIdGenerator;
use crate::outbox::Delivery;
use crate::repository::session_repository::{
    InMemorySessionRepository, SessionRecord, SessionStatus,
};
use shared::models::{ConnectionId, IceServer, ServerEvent, SessionId, Signal};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a session needs two distinct participants")]
    SameParticipant,
    #[error("connection {0} already belongs to a session")]
    AlreadyInSession(ConnectionId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("connection {connection_id} is not a participant of session {session_id}")]
    NotAParticipant {
        session_id: SessionId,
        connection_id: ConnectionId,
    },
}

/// Active two-party sessions and the relay between their members.
pub struct SessionRegistry {
    repository: InMemorySessionRepository,
    ids: Box<dyn SessionIdGenerator>,
    ice_servers: Vec<IceServer>,
    session_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(
        ids: Box<dyn SessionIdGenerator>,
        ice_servers: Vec<IceServer>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            repository: InMemorySessionRepository::new(),
            ids,
            ice_servers,
            session_timeout,
        }
    }

    /// Opens a session in `Connecting` state and returns the `session-start`
    /// notice for each side. `initiator` starts the handshake.
    pub fn create_session(
        &mut self,
        initiator: ConnectionId,
        responder: ConnectionId,
        now: Instant,
    ) -> Result<(SessionId, Vec<Delivery>), RegistryError> {
        if initiator == responder {
            return Err(RegistryError::SameParticipant);
        }
        for id in [initiator, responder] {
            if self.repository.session_for_connection(&id).is_some() {
                return Err(RegistryError::AlreadyInSession(id));
            }
        }

        let mut session_id = self.ids.next_id();
        while self.repository.contains_session(&session_id) {
            session_id = self.ids.next_id();
        }

        let stored = self.repository.insert_session(SessionRecord {
            session_id: session_id.clone(),
            participant_a: initiator,
            participant_b: responder,
            created_at: now,
            status: SessionStatus::Connecting,
        });
        debug_assert!(stored, "membership was checked above");

        info!(%session_id, %initiator, %responder, "session created");

        let deliveries = [(initiator, true), (responder, false)]
            .into_iter()
            .map(|(to, is_initiator)| Delivery {
                to,
                event: ServerEvent::SessionStart {
                    session_id: session_id.clone(),
                    ice_servers: self.ice_servers.clone(),
                    is_initiator,
                },
            })
            .collect();
        Ok((session_id, deliveries))
    }

    /// Forwards `signal` from `sender` to the other member of the session.
    /// A relayed answer marks the session connected.
    pub fn relay(
        &mut self,
        session_id: &SessionId,
        sender: ConnectionId,
        signal: Signal,
        timestamp_ms: u64,
    ) -> Result<Delivery, RelayError> {
        let session = self
            .repository
            .get_session_mut(session_id)
            .ok_or_else(|| RelayError::SessionNotFound(session_id.clone()))?;
        let to = session
            .counterpart(&sender)
            .ok_or_else(|| RelayError::NotAParticipant {
                session_id: session_id.clone(),
                connection_id: sender,
            })?;

        if matches!(signal, Signal::Answer { .. }) && session.status == SessionStatus::Connecting {
            session.status = SessionStatus::Connected;
            info!(%session_id, "session connected");
        }

        debug!(%session_id, from = %sender, %to, kind = signal.kind(), "relaying signal");
        Ok(Delivery {
            to,
            event: signal.into_event(session_id.clone(), timestamp_ms),
        })
    }

    /// Removes the session holding `connection_id`, if any, and returns the
    /// `peer-disconnected` notice for the member left behind.
    pub fn teardown(&mut self, connection_id: &ConnectionId) -> Option<Delivery> {
        let session_id = self
            .repository
            .session_for_connection(connection_id)?
            .session_id
            .clone();
        let record = self.repository.remove_session(&session_id)?;
        let remaining = record.counterpart(connection_id)?;
        info!(%session_id, departed = %connection_id, %remaining, "session torn down");
        Some(Delivery {
            to: remaining,
            event: ServerEvent::PeerDisconnected,
        })
    }

    /// Deletes every session still connecting after the timeout and returns
    /// one `connection-timeout` notice per participant.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        for session_id in self
            .repository
            .expired_connecting(now, self.session_timeout)
        {
            let Some(record) = self.repository.remove_session(&session_id) else {
                continue;
            };
            info!(%session_id, "session timed out before connecting");
            deliveries.extend(record.participants().into_iter().map(|to| Delivery {
                to,
                event: ServerEvent::ConnectionTimeout,
            }));
        }
        deliveries
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.repository.get_session(session_id)
    }

    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<&SessionRecord> {
        self.repository.session_for_connection(connection_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.repository.sessions()
    }

    pub fn session_count(&self) -> usize {
        self.repository.session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialSessionIds;
    use serde_json::json;
    use uuid::Uuid;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            Box::new(SequentialSessionIds::new()),
            vec![IceServer::new("stun:stun.l.google.com:19302")],
            Duration::from_secs(30),
        )
    }

    fn conn(n: u128) -> ConnectionId {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_create_session_notifies_both_with_one_initiator() {
        let mut registry = registry();
        let (session_id, deliveries) = registry
            .create_session(conn(1), conn(2), Instant::now())
            .unwrap();
        assert_eq!(session_id.as_str(), "1");
        assert_eq!(deliveries.len(), 2);

        let initiators: Vec<_> = deliveries
            .iter()
            .filter(|d| {
                matches!(
                    d.event,
                    ServerEvent::SessionStart {
                        is_initiator: true,
                        ..
                    }
                )
            })
            .map(|d| d.to)
            .collect();
        assert_eq!(initiators, vec![conn(1)]);
        assert_eq!(
            registry.session(&session_id).unwrap().status,
            SessionStatus::Connecting
        );
    }

    #[test]
    fn test_create_session_rejects_busy_or_identical_participants() {
        let mut registry = registry();
        let now = Instant::now();
        registry.create_session(conn(1), conn(2), now).unwrap();
        assert_eq!(
            registry.create_session(conn(3), conn(3), now).unwrap_err(),
            RegistryError::SameParticipant
        );
        assert_eq!(
            registry.create_session(conn(2), conn(3), now).unwrap_err(),
            RegistryError::AlreadyInSession(conn(2))
        );
    }

    #[test]
    fn test_relay_reaches_counterpart_and_answer_connects() {
        let mut registry = registry();
        let (session_id, _) = registry
            .create_session(conn(1), conn(2), Instant::now())
            .unwrap();

        let offer = registry
            .relay(&session_id, conn(1), Signal::Offer { sdp: json!("o") }, 0)
            .unwrap();
        assert_eq!(offer.to, conn(2));
        assert_eq!(
            registry.session(&session_id).unwrap().status,
            SessionStatus::Connecting
        );

        let answer = registry
            .relay(&session_id, conn(2), Signal::Answer { sdp: json!("a") }, 0)
            .unwrap();
        assert_eq!(answer.to, conn(1));
        assert_eq!(
            registry.session(&session_id).unwrap().status,
            SessionStatus::Connected
        );
    }

    #[test]
    fn test_relay_misses_are_errors_not_deliveries() {
        let mut registry = registry();
        let (session_id, _) = registry
            .create_session(conn(1), conn(2), Instant::now())
            .unwrap();

        let missing = registry.relay(
            &SessionId::from("nope"),
            conn(1),
            Signal::Chat {
                text: "hi".into(),
            },
            0,
        );
        assert_eq!(
            missing.unwrap_err(),
            RelayError::SessionNotFound(SessionId::from("nope"))
        );

        let stranger = registry.relay(&session_id, conn(9), Signal::Offer { sdp: json!({}) }, 0);
        assert!(matches!(stranger, Err(RelayError::NotAParticipant { .. })));
    }

    #[test]
    fn test_teardown_notifies_remaining_member_once() {
        let mut registry = registry();
        let (session_id, _) = registry
            .create_session(conn(1), conn(2), Instant::now())
            .unwrap();

        let notice = registry.teardown(&conn(2)).unwrap();
        assert_eq!(notice.to, conn(1));
        assert_eq!(notice.event, ServerEvent::PeerDisconnected);
        assert!(registry.session(&session_id).is_none());
        assert!(registry.session_of(&conn(1)).is_none());
        assert!(registry.teardown(&conn(1)).is_none());
    }

    #[test]
    fn test_expire_stale_times_out_connecting_sessions_only() {
        let mut registry = registry();
        let start = Instant::now();
        let (stuck, _) = registry.create_session(conn(1), conn(2), start).unwrap();
        let (live, _) = registry.create_session(conn(3), conn(4), start).unwrap();
        registry
            .relay(&live, conn(4), Signal::Answer { sdp: json!("a") }, 0)
            .unwrap();

        assert!(registry
            .expire_stale(start + Duration::from_secs(29))
            .is_empty());

        let notices = registry.expire_stale(start + Duration::from_secs(30));
        let mut targets: Vec<_> = notices.iter().map(|d| d.to).collect();
        targets.sort();
        assert_eq!(targets, vec![conn(1), conn(2)]);
        assert!(notices
            .iter()
            .all(|d| d.event == ServerEvent::ConnectionTimeout));
        assert!(registry.session(&stuck).is_none());
        assert!(registry.session(&live).is_some());

        assert!(registry
            .expire_stale(start + Duration::from_secs(120))
            .is_empty());
    }
}
