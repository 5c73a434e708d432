use crate::hub::{HubError, HubHandle};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Evict queue entries that waited too long.
    Queue,
    /// Time out sessions that never finished their handshake.
    Sessions,
}

impl Sweep {
    fn request(self, hub: &HubHandle) -> Result<(), HubError> {
        match self {
            Sweep::Queue => hub.sweep_queue(),
            Sweep::Sessions => hub.sweep_sessions(),
        }
    }
}

/// Periodic sweep tasks. They never touch matchmaking state; they only ask
/// the hub to run a sweep on its next turn.
pub struct Supervisor {
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Starts one ticking task per sweep kind.
    pub fn spawn(hub: HubHandle, period: Duration) -> Self {
        let tasks = [Sweep::Queue, Sweep::Sessions]
            .into_iter()
            .map(|sweep| spawn_sweep(hub.clone(), sweep, period))
            .collect();
        info!(period_secs = period.as_secs(), "timeout supervisor started");
        Self { tasks }
    }

    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Requests `sweep` from the hub every `period`, starting one period from
/// now. Stops once the hub is gone.
pub fn spawn_sweep(hub: HubHandle, sweep: Sweep, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if sweep.request(&hub).is_err() {
                debug!(?sweep, "hub closed, sweep task exiting");
                break;
            }
        }
    })
}
