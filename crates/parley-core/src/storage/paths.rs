//! `local://` storage paths.

/// Persisted display name.
pub const IDENTITY_NAME: &str = "local://identity/name";

/// Replica node id of this client, 8 bytes big-endian.
pub const NODE_ID: &str = "local://identity/node";

/// Derived key bytes for `room`.
pub fn room_key(room: &str) -> String {
    format!("local://keys/{room}/key")
}

/// Passphrase the key for `room` was derived from, kept for display.
pub fn room_passphrase(room: &str) -> String {
    format!("local://keys/{room}/passphrase")
}

/// Cell scope of the replicated store for `room`.
pub fn store_scope(room: &str) -> String {
    format!("local://store/{room}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_room_scoped() {
        assert_eq!(room_key("general"), "local://keys/general/key");
        assert_eq!(room_passphrase("general"), "local://keys/general/passphrase");
        assert_eq!(store_scope("general"), "local://store/general");
        assert_ne!(room_key("a"), room_key("b"));
    }
}
