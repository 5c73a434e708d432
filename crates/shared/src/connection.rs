use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate an opaque session id
/// Uses 16 bytes of random data, hex encoded
pub fn gen_session_id() -> String {
    let mut bytes = [0u8; 16];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Milliseconds since the unix epoch, zero if the system clock is before it
pub fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
