//! # Session Bootstrap
//!
//! Guards the transition from "process started" to "pipeline running":
//!
//! 1. [`SessionBootstrap::check`] reads the session record. A record with `started` set but
//!    `ready` clear means an earlier run died during bootstrap; that is reported as
//!    [`CollectorError::CorruptedState`] and never repaired here.
//! 2. [`SessionBootstrap::seed`] durably marks the run started and enqueues the session
//!    control envelope (sequence −1) before any worker exists, so it is the first envelope
//!    every stage sees.
//! 3. [`SessionBootstrap::confirm_ready`] sets `ready` once every stage reported started.

use codec::{ProtocolCodec, RouterIdentity};
use state_store::SessionState;
use std::sync::Arc;
use tracing::{error, info};
use types::{Envelope, SessionRecord};

use crate::error::{CollectorError, Result};
use crate::queue::EnvelopeQueue;

pub struct SessionBootstrap {
    session: SessionState,
    codec: Arc<dyn ProtocolCodec>,
    identity: RouterIdentity,
}

impl SessionBootstrap {
    pub fn new(session: SessionState, codec: Arc<dyn ProtocolCodec>, identity: RouterIdentity) -> Self {
        Self {
            session,
            codec,
            identity,
        }
    }

    pub fn check(&self) -> Result<SessionRecord> {
        let record = self.session.read_record()?;
        if record.is_corrupted() {
            let checkpoint = record
                .checkpoint
                .map_or_else(|| "none".to_string(), |sequence| sequence.to_string());
            error!(
                checkpoint = %checkpoint,
                "❌ Session state is corrupted: a previous run stopped between start and ready. \
                 Verify downstream consumers, then run `reset-state --yes`"
            );
            return Err(CollectorError::CorruptedState { checkpoint });
        }

        info!(
            started = record.started,
            checkpoint = ?record.checkpoint,
            resume_at = record.resume_sequence(),
            "Session state consistent"
        );
        Ok(record)
    }

    /// Mark the run started, then enqueue the session control envelope
    pub async fn seed(&self, queue: &EnvelopeQueue) -> Result<()> {
        self.session.mark_started()?;

        let initiation = self.codec.encode_initiation(&self.identity);
        queue.enqueue(Envelope::control(initiation)).await?;
        info!(
            sys_name = %self.identity.sys_name,
            sys_descr = %self.identity.sys_descr,
            "🚀 Session control envelope enqueued"
        );
        Ok(())
    }

    pub fn confirm_ready(&self) -> Result<()> {
        self.session.mark_ready()?;
        Ok(())
    }
}
