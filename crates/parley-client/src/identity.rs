//! Persisted display name and replica node id.

use parley_core::{Environment, Storage, StorageError, storage::paths};
use tracing::{debug, info};

/// Reads and writes the client's identity.
#[derive(Debug, Clone)]
pub struct IdentityStore<S: Storage> {
    storage: S,
}

impl<S: Storage> IdentityStore<S> {
    /// Identity store over `storage`.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Persisted display name. A name that is not UTF-8 reads as none.
    pub fn name(&self) -> Result<Option<String>, StorageError> {
        Ok(self.storage.get(paths::IDENTITY_NAME)?.and_then(|bytes| String::from_utf8(bytes).ok()))
    }

    /// Persist `name` for future sessions.
    pub fn save_name(&self, name: &str) -> Result<(), StorageError> {
        self.storage.put(paths::IDENTITY_NAME, name.as_bytes())?;
        debug!(name, "identity saved");
        Ok(())
    }

    /// Forget the persisted name.
    pub fn clear_name(&self) -> Result<(), StorageError> {
        self.storage.delete(paths::IDENTITY_NAME)?;
        info!("identity cleared");
        Ok(())
    }

    /// Replica node id, generated and persisted on first use.
    pub fn node_id<E: Environment>(&self, env: &E) -> Result<u64, StorageError> {
        if let Some(bytes) = self.storage.get(paths::NODE_ID)?
            && let Ok(raw) = <[u8; 8]>::try_from(bytes.as_slice())
        {
            return Ok(u64::from_be_bytes(raw));
        }

        let node = env.random_u64();
        self.storage.put(paths::NODE_ID, &node.to_be_bytes())?;
        debug!(node, "replica node id created");
        Ok(node)
    }
}
