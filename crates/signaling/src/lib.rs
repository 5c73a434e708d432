pub mod clock;
pub mod config;
pub mod hub;
pub mod ids;
pub mod outbox;
pub mod presence;
pub mod registry;
pub mod repository;
pub mod server;
pub mod services;
pub mod supervisor;

pub use config::{SessionIdStrategy, SignalingServerConfig};
pub use hub::{spawn_hub, HubHandle, HubStats};
pub use server::{router, run_server, serve, start_core};
pub use services::{MatchmakingService, MatchmakingSettings};
