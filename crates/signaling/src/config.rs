use crate::ids::{RandomSessionIds, SequentialSessionIds, SessionIdGenerator};
use crate::services::MatchmakingSettings;
use shared::models::IceServer;
use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

const DEFAULT_LISTEN_PORT: u16 = 3000;
const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_QUEUE_MAX_WAIT_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302";
const DEFAULT_MAX_DISPLAY_NAME_CHARS: usize = 64;
const DEFAULT_MAX_CHAT_CHARS: usize = 2000;
const DEFAULT_OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIdStrategy {
    Random,
    Sequential,
}

impl SessionIdStrategy {
    pub fn generator(self) -> Box<dyn SessionIdGenerator> {
        match self {
            SessionIdStrategy::Random => Box::new(RandomSessionIds),
            SessionIdStrategy::Sequential => Box::new(SequentialSessionIds::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingServerConfig {
    pub listen_addr: SocketAddr,
    pub session_timeout: Duration,
    pub queue_max_wait: Duration,
    pub sweep_interval: Duration,
    pub ice_servers: Vec<IceServer>,
    pub session_ids: SessionIdStrategy,
    pub max_display_name_chars: usize,
    pub max_chat_chars: usize,
    /// Events buffered per connection before further ones are dropped.
    pub outbound_buffer: usize,
}

impl SignalingServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing or unparseable values
    /// fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_port = lookup("SIGNALING_PORT")
            .and_then(|raw| raw.parse::<u16>().ok())
            .unwrap_or(DEFAULT_LISTEN_PORT);

        let listen_addr = lookup("SIGNALING_ADDR")
            .and_then(|raw| raw.parse::<IpAddr>().ok())
            .map(|ip| SocketAddr::new(ip, listen_port))
            .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), listen_port));

        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|raw| raw.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default))
        };
        let session_timeout = secs("SIGNALING_SESSION_TIMEOUT_SECS", DEFAULT_SESSION_TIMEOUT_SECS);
        let queue_max_wait = secs("SIGNALING_QUEUE_MAX_WAIT_SECS", DEFAULT_QUEUE_MAX_WAIT_SECS);
        let sweep_interval = secs("SIGNALING_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS);

        let ice_servers = parse_ice_servers(
            &lookup("SIGNALING_ICE_SERVERS").unwrap_or_else(|| DEFAULT_ICE_SERVERS.to_string()),
        );
        if ice_servers.is_empty() {
            anyhow::bail!("SIGNALING_ICE_SERVERS must list at least one stun: or turn: url");
        }

        let session_ids = lookup("SIGNALING_SESSION_IDS")
            .and_then(|raw| match raw.to_lowercase().as_str() {
                "sequential" | "counter" => Some(SessionIdStrategy::Sequential),
                "random" => Some(SessionIdStrategy::Random),
                _ => None,
            })
            .unwrap_or(SessionIdStrategy::Random);

        let max_display_name_chars = lookup("SIGNALING_MAX_DISPLAY_NAME_CHARS")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_DISPLAY_NAME_CHARS);

        let max_chat_chars = lookup("SIGNALING_MAX_CHAT_CHARS")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_CHAT_CHARS);

        let outbound_buffer = lookup("SIGNALING_OUTBOUND_BUFFER")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_OUTBOUND_BUFFER);

        Ok(Self {
            listen_addr,
            session_timeout,
            queue_max_wait,
            sweep_interval,
            ice_servers,
            session_ids,
            max_display_name_chars,
            max_chat_chars,
            outbound_buffer,
        })
    }

    pub fn matchmaking_settings(&self) -> MatchmakingSettings {
        MatchmakingSettings {
            session_timeout: self.session_timeout,
            queue_max_wait: self.queue_max_wait,
            ice_servers: self.ice_servers.clone(),
            max_display_name_chars: self.max_display_name_chars,
        }
    }
}

impl Default for SignalingServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_LISTEN_PORT),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT_SECS),
            queue_max_wait: Duration::from_secs(DEFAULT_QUEUE_MAX_WAIT_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            ice_servers: parse_ice_servers(DEFAULT_ICE_SERVERS),
            session_ids: SessionIdStrategy::Random,
            max_display_name_chars: DEFAULT_MAX_DISPLAY_NAME_CHARS,
            max_chat_chars: DEFAULT_MAX_CHAT_CHARS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Comma-separated `stun:`/`turn:` urls. A turn url may carry credentials
/// as `turn:user:secret@host:port`.
fn parse_ice_servers(raw: &str) -> Vec<IceServer> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:"))
        .map(|url| match url.split_once('@') {
            Some((scheme_and_auth, host)) if !url.starts_with("stun:") => {
                let (scheme, auth) = scheme_and_auth
                    .split_once(':')
                    .unwrap_or((scheme_and_auth, ""));
                let (username, credential) = auth.split_once(':').unwrap_or((auth, ""));
                IceServer {
                    urls: vec![format!("{scheme}:{host}")],
                    username: Some(username.to_string()).filter(|u| !u.is_empty()),
                    credential: Some(credential.to_string()).filter(|c| !c.is_empty()),
                }
            }
            _ => IceServer::new(url),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<SignalingServerConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SignalingServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, SignalingServerConfig::default());
        assert_eq!(cfg.listen_addr.port(), 3000);
        assert_eq!(cfg.session_timeout, Duration::from_secs(30));
        assert_eq!(cfg.queue_max_wait, Duration::from_secs(60));
        assert_eq!(cfg.ice_servers.len(), 2);
    }

    #[test]
    fn test_overrides_are_applied() {
        let cfg = config(&[
            ("SIGNALING_ADDR", "0.0.0.0"),
            ("SIGNALING_PORT", "9000"),
            ("SIGNALING_SESSION_TIMEOUT_SECS", "5"),
            ("SIGNALING_SESSION_IDS", "Sequential"),
            ("SIGNALING_MAX_CHAT_CHARS", "10"),
            ("SIGNALING_OUTBOUND_BUFFER", "8"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.session_timeout, Duration::from_secs(5));
        assert_eq!(cfg.session_ids, SessionIdStrategy::Sequential);
        assert_eq!(cfg.max_chat_chars, 10);
        assert_eq!(cfg.outbound_buffer, 8);
        assert_eq!(cfg.matchmaking_settings().session_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("SIGNALING_PORT", "not-a-port"),
            ("SIGNALING_QUEUE_MAX_WAIT_SECS", "0"),
            ("SIGNALING_SESSION_IDS", "dice"),
            ("SIGNALING_OUTBOUND_BUFFER", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr.port(), 3000);
        assert_eq!(cfg.queue_max_wait, Duration::from_secs(60));
        assert_eq!(cfg.session_ids, SessionIdStrategy::Random);
        assert_eq!(cfg.outbound_buffer, 64);
    }

    #[test]
    fn test_ice_servers_parse_turn_credentials() {
        let cfg = config(&[(
            "SIGNALING_ICE_SERVERS",
            "stun:stun.example.org:3478, turn:alice:s3cret@turn.example.org:3478",
        )])
        .unwrap();
        assert_eq!(
            cfg.ice_servers,
            vec![
                IceServer::new("stun:stun.example.org:3478"),
                IceServer {
                    urls: vec!["turn:turn.example.org:3478".to_string()],
                    username: Some("alice".to_string()),
                    credential: Some("s3cret".to_string()),
                },
            ]
        );
    }

    #[test]
    fn test_ice_servers_must_not_be_empty() {
        assert!(config(&[("SIGNALING_ICE_SERVERS", "http://nope")]).is_err());
    }
}
