//! Per-room key management.
//!
//! Keys are derived from a passphrase and persisted so a returning client
//! does not re-derive on every join. The passphrase is kept alongside the key
//! for display only; lookups never re-derive.

use parley_crypto::{RoomKey, derive_room_key};
use tracing::{debug, info};

use crate::{
    error::KeyStorageError,
    storage::{Storage, paths},
};

/// Derives, persists and looks up room keys.
#[derive(Clone)]
pub struct KeyManager<S: Storage> {
    storage: S,
}

impl<S: Storage> KeyManager<S> {
    /// Create a key manager over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persisted key for `room`. `None` if none was saved.
    ///
    /// Pure lookup: never derives.
    pub fn get_room_key(&self, room: &str) -> Result<Option<RoomKey>, KeyStorageError> {
        let Some(bytes) = self.storage.get(&paths::room_key(room))? else {
            return Ok(None);
        };
        RoomKey::from_slice(&bytes).map(Some).map_err(|e| KeyStorageError::Corrupt(e.to_string()))
    }

    /// Derive the key for `(room, passphrase)` and persist it.
    ///
    /// Runs the full key derivation on the calling thread; async callers
    /// should derive on a worker and use [`Self::save_derived`] instead.
    pub fn save_room_password(&self, room: &str, passphrase: &str) -> Result<RoomKey, KeyStorageError> {
        let key = derive_room_key(room, passphrase);
        self.save_derived(room, passphrase, &key)?;
        Ok(key)
    }

    /// Persist a key already derived from `passphrase`.
    pub fn save_derived(&self, room: &str, passphrase: &str, key: &RoomKey) -> Result<(), KeyStorageError> {
        self.storage.put(&paths::room_passphrase(room), passphrase.as_bytes())?;
        self.storage.put(&paths::room_key(room), key.as_bytes())?;

        info!(room, fingerprint = %key.fingerprint(), "room key saved");
        Ok(())
    }

    /// Passphrase the current key was derived from, for display.
    pub fn get_room_password(&self, room: &str) -> Result<Option<String>, KeyStorageError> {
        let Some(bytes) = self.storage.get(&paths::room_passphrase(room))? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| KeyStorageError::Corrupt("passphrase is not UTF-8".to_string()))
    }

    /// Remove all key material for `room`.
    pub fn delete_room_password(&self, room: &str) -> Result<(), KeyStorageError> {
        self.storage.delete(&paths::room_key(room))?;
        self.storage.delete(&paths::room_passphrase(room))?;

        info!(room, "room key deleted");
        Ok(())
    }

    /// Persisted key for `room`, or the default key derived from the room id.
    pub fn ensure_room_key(&self, room: &str) -> Result<RoomKey, KeyStorageError> {
        if let Some(key) = self.get_room_key(room)? {
            debug!(room, fingerprint = %key.fingerprint(), "using persisted room key");
            return Ok(key);
        }
        self.save_room_password(room, room)
    }
}
