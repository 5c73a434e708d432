use shared::models::SessionId;

/// Source of session ids. Implementations must never yield the same id twice.
pub trait SessionIdGenerator: Send + 'static {
    fn next_id(&mut self) -> SessionId;
}

/// Monotonic counter: "1", "2", "3", ...
#[derive(Debug, Clone)]
pub struct SequentialSessionIds {
    next: u64,
}

impl SequentialSessionIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }
}

impl Default for SequentialSessionIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdGenerator for SequentialSessionIds {
    fn next_id(&mut self) -> SessionId {
        let id = SessionId::new(self.next.to_string());
        self.next += 1;
        id
    }
}

/// 128 random bits, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSessionIds;

impl SessionIdGenerator for RandomSessionIds {
    fn next_id(&mut self) -> SessionId {
        SessionId::new(shared::connection::gen_session_id())
    }
}

impl SessionIdGenerator for Box<dyn SessionIdGenerator> {
    fn next_id(&mut self) -> SessionId {
        (**self).next_id()
    }
}
