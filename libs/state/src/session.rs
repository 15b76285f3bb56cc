//! Session lifecycle record on top of a [`StateStore`]

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::session::{
    decode_checkpoint, decode_flag, encode_checkpoint, CHECKPOINT_KEY, FLAG_CLEAR, FLAG_SET,
    READY_KEY, STARTED_KEY,
};
use types::{Sequence, SessionRecord};

use crate::error::{Result, StoreError};
use crate::store::StateStore;

/// Reads and writes the `started` / `ready` / `checkpoint.sequence` keys
///
/// Checkpoints are monotonic: a write older than the last persisted checkpoint is ignored.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn StateStore>,
    last_checkpoint: Arc<Mutex<i64>>,
}

impl SessionState {
    pub fn new(store: Arc<dyn StateStore>) -> Result<Self> {
        let persisted = store
            .get(CHECKPOINT_KEY)?
            .and_then(|value| decode_checkpoint(&value))
            .unwrap_or(Sequence::CONTROL_SENTINEL);
        Ok(Self {
            store,
            last_checkpoint: Arc::new(Mutex::new(persisted)),
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn read_record(&self) -> Result<SessionRecord> {
        let started = decode_flag(self.store.get(STARTED_KEY)?.as_deref());
        let ready = decode_flag(self.store.get(READY_KEY)?.as_deref());
        let checkpoint = self
            .store
            .get(CHECKPOINT_KEY)?
            .and_then(|value| decode_checkpoint(&value))
            .map(Sequence::from_i64);
        Ok(SessionRecord {
            started,
            ready,
            checkpoint,
        })
    }

    /// Mark the start of a run: `started = 1` and `ready = 0` in one durable write
    pub fn mark_started(&self) -> Result<()> {
        self.store
            .write_batch(&[(STARTED_KEY, FLAG_SET), (READY_KEY, FLAG_CLEAR)])?;
        debug!("Session marked started");
        Ok(())
    }

    pub fn mark_ready(&self) -> Result<()> {
        self.store.put(READY_KEY, FLAG_SET)?;
        info!("✅ Session marked ready");
        Ok(())
    }

    /// Clear both lifecycle flags after a corrupted-state abort; the checkpoint is kept
    pub fn reset_lifecycle(&self) -> Result<()> {
        self.store
            .write_batch(&[(STARTED_KEY, FLAG_CLEAR), (READY_KEY, FLAG_CLEAR)])?;
        info!("Session lifecycle flags cleared");
        Ok(())
    }

    /// Last checkpoint written by this handle or found on open
    pub fn last_checkpoint(&self) -> Sequence {
        Sequence::from_i64(*self.last_checkpoint.lock())
    }

    /// Persist `sequence` as the checkpoint unless it would move backwards
    ///
    /// Returns whether a write happened.
    pub fn checkpoint(&self, sequence: Sequence) -> Result<bool> {
        let Some(value) = sequence.to_i64() else {
            if let Sequence::Assigned(unrepresentable) = sequence {
                warn!(
                    sequence = unrepresentable,
                    "⚠️ Sequence exceeds the persisted range, checkpoint skipped"
                );
            }
            return Ok(false);
        };

        let mut last = self.last_checkpoint.lock();
        if value <= *last {
            return Ok(false);
        }
        self.store.put(CHECKPOINT_KEY, &encode_checkpoint(value))?;
        *last = value;
        drop(last);

        debug!(sequence = value, "Checkpoint persisted");
        Ok(true)
    }

    /// [`SessionState::checkpoint`] on the blocking pool
    pub async fn checkpoint_async(&self, sequence: Sequence) -> Result<bool> {
        let session = self.clone();
        tokio::task::spawn_blocking(move || session.checkpoint(sequence))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("last_checkpoint", &self.last_checkpoint())
            .finish()
    }
}
