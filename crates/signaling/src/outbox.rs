use shared::models::{ConnectionId, ServerEvent};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// An event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub event: ServerEvent,
}

pub trait Outbox: Send + 'static {
    /// Hands the event to the connection's writer. Never blocks; a delivery
    /// to a vanished or backed-up connection is dropped.
    fn deliver(&mut self, delivery: Delivery);
}

/// Per-connection outbound channels, drained by each socket's writer task.
/// Channels are bounded: a client that stops reading loses events instead of
/// growing its buffer.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    senders: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        self.senders.insert(connection_id, sender);
    }

    pub fn unregister(&mut self, connection_id: &ConnectionId) -> bool {
        self.senders.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl Outbox for ConnectionTable {
    fn deliver(&mut self, delivery: Delivery) {
        let Some(sender) = self.senders.get(&delivery.to) else {
            debug!(connection_id = %delivery.to, event = delivery.event.name(), "no such connection, dropping event");
            return;
        };
        match sender.try_send(delivery.event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(connection_id = %delivery.to, event = event.name(), "outbound buffer full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %delivery.to, "writer closed, dropping event");
            }
        }
    }
}

/// Logs every outbound event before passing it on.
#[derive(Debug, Default)]
pub struct LoggingOutbox<O> {
    inner: O,
}

impl<O: Outbox> LoggingOutbox<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut O {
        &mut self.inner
    }
}

impl<O: Outbox> Outbox for LoggingOutbox<O> {
    fn deliver(&mut self, delivery: Delivery) {
        info!(connection_id = %delivery.to, event = delivery.event.name(), "emitting event");
        self.inner.deliver(delivery);
    }
}
