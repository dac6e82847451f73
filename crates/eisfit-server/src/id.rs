//! Request identifiers: 16 hex characters from 8 bytes of OS randomness.

use rand::rngs::OsRng;
use rand::RngCore;

/// Generate a request id. Falls back to a fixed marker if the OS entropy
/// source is unavailable.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 8];
    if OsRng.try_fill_bytes(&mut bytes).is_err() {
        return "unknown".to_string();
    }
    hex::encode(bytes)
}
