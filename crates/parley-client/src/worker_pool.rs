//! Background workers for CPU-heavy crypto.
//!
//! Key derivation runs 100k PBKDF2 rounds and every message passes through
//! an AEAD, so none of it may run on the event loop. The pool owns a fixed
//! number of worker tasks pulling from one shared FIFO queue. Each worker
//! runs one job at a time on the blocking thread pool and answers on the
//! job's own reply channel.
//!
//! # Failure isolation
//!
//! A failing or panicking job resolves only its own caller with a
//! [`WorkerError`]. The worker that ran it picks up the next job as usual.
//!
//! # Backpressure
//!
//! None. The queue is unbounded and jobs have no timeout: a stuck job stalls
//! its caller.

use std::sync::Arc;

use parley_crypto::{NONCE_SIZE, RoomKey, decrypt_text, derive_room_key, encrypt_text};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 2;

/// A unit of crypto work.
#[derive(Debug, Clone)]
pub enum CryptoTask {
    /// Seal `plaintext` into an encrypted envelope.
    Encrypt {
        /// Message text
        plaintext: String,
        /// Room key
        key: RoomKey,
        /// Fresh nonce
        nonce: [u8; NONCE_SIZE],
    },
    /// Open an encrypted envelope.
    Decrypt {
        /// Envelope text
        envelope: String,
        /// Room key
        key: RoomKey,
    },
    /// Derive a room key from a passphrase.
    DeriveKey {
        /// Room id (salt)
        room: String,
        /// User passphrase
        passphrase: String,
    },
    /// Panics inside the worker.
    #[cfg(test)]
    Poison,
}

impl CryptoTask {
    fn kind(&self) -> &'static str {
        match self {
            Self::Encrypt { .. } => "encrypt",
            Self::Decrypt { .. } => "decrypt",
            Self::DeriveKey { .. } => "derive_key",
            #[cfg(test)]
            Self::Poison => "poison",
        }
    }

    fn run(self) -> Result<CryptoOutput, WorkerError> {
        match self {
            Self::Encrypt { plaintext, key, nonce } => {
                Ok(CryptoOutput::Envelope(encrypt_text(&plaintext, &key, nonce)))
            },
            Self::Decrypt { envelope, key } => Ok(CryptoOutput::Plaintext(decrypt_text(&envelope, &key)?)),
            Self::DeriveKey { room, passphrase } => Ok(CryptoOutput::Key(derive_room_key(&room, &passphrase))),
            #[cfg(test)]
            #[allow(clippy::panic)]
            Self::Poison => panic!("poisoned task"),
        }
    }
}

/// Result of a [`CryptoTask`].
#[derive(Debug, Clone)]
pub enum CryptoOutput {
    /// Encrypted envelope text
    Envelope(String),
    /// Decrypted text
    Plaintext(String),
    /// Derived key
    Key(RoomKey),
}

struct Job {
    task: CryptoTask,
    reply: oneshot::Sender<Result<CryptoOutput, WorkerError>>,
}

/// Fixed-size pool of crypto workers.
///
/// Cheap to clone; workers exit once every clone is dropped and the queue
/// drains.
#[derive(Clone)]
pub struct CryptoWorkerPool {
    jobs: mpsc::UnboundedSender<Job>,
    workers: usize,
}

impl CryptoWorkerPool {
    /// Spawn `workers` workers (at least one) on the current tokio runtime.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (jobs, queue) = mpsc::unbounded_channel();
        let queue = Arc::new(Mutex::new(queue));

        for id in 0..workers {
            tokio::spawn(worker_loop(id, Arc::clone(&queue)));
        }

        debug!(workers, "crypto worker pool started");
        Self { jobs, workers }
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queue `task` and wait for its result.
    pub async fn submit(&self, task: CryptoTask) -> Result<CryptoOutput, WorkerError> {
        let (reply, result) = oneshot::channel();
        self.jobs.send(Job { task, reply }).map_err(|_| WorkerError::PoolClosed)?;
        result.await.map_err(|_| WorkerError::PoolClosed)?
    }

    /// Encrypt `plaintext` into envelope text.
    pub async fn encrypt(
        &self,
        plaintext: impl Into<String>,
        key: RoomKey,
        nonce: [u8; NONCE_SIZE],
    ) -> Result<String, WorkerError> {
        match self.submit(CryptoTask::Encrypt { plaintext: plaintext.into(), key, nonce }).await? {
            CryptoOutput::Envelope(envelope) => Ok(envelope),
            other => Err(unexpected(&other)),
        }
    }

    /// Decrypt envelope text.
    ///
    /// `WorkerError::Crypto(CryptoError::MalformedEnvelope)` means the text
    /// was not a parseable envelope; other crypto errors mean it was, but the
    /// key did not open it.
    pub async fn decrypt(&self, envelope: impl Into<String>, key: RoomKey) -> Result<String, WorkerError> {
        match self.submit(CryptoTask::Decrypt { envelope: envelope.into(), key }).await? {
            CryptoOutput::Plaintext(text) => Ok(text),
            other => Err(unexpected(&other)),
        }
    }

    /// Derive the key for `(room, passphrase)`.
    pub async fn derive_key(
        &self,
        room: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<RoomKey, WorkerError> {
        match self.submit(CryptoTask::DeriveKey { room: room.into(), passphrase: passphrase.into() }).await? {
            CryptoOutput::Key(key) => Ok(key),
            other => Err(unexpected(&other)),
        }
    }
}

impl std::fmt::Debug for CryptoWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoWorkerPool").field("workers", &self.workers).finish_non_exhaustive()
    }
}

fn unexpected(output: &CryptoOutput) -> WorkerError {
    // Each task kind maps to exactly one output kind
    warn!(?output, "worker returned mismatched output");
    WorkerError::Panicked
}

async fn worker_loop(id: usize, queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>) {
    loop {
        let job = {
            let mut queue = queue.lock().await;
            queue.recv().await
        };
        let Some(Job { task, reply }) = job else {
            debug!(worker = id, "crypto worker exiting");
            return;
        };

        let kind = task.kind();
        let result = match tokio::task::spawn_blocking(move || task.run()).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!(worker = id, kind, "crypto task panicked");
                Err(WorkerError::Panicked)
            },
            Err(e) => {
                warn!(worker = id, kind, error = %e, "crypto task cancelled");
                Err(WorkerError::PoolClosed)
            },
        };

        if reply.send(result).is_err() {
            debug!(worker = id, kind, "caller went away before result");
        }
    }
}
