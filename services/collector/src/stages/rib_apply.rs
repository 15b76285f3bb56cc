//! Stage 0: decode inbound bytes, apply them to the RIB and sequence the change records

use async_trait::async_trait;
use codec::ProtocolCodec;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::{ChangeRecord, Envelope, MessageKind, Sequence, Stage};

use super::{StageContext, StageProcessor};
use crate::error::StageResult;
use crate::rib::RibApplier;

pub struct RibApplyStage {
    codec: Arc<dyn ProtocolCodec>,
    rib: Box<dyn RibApplier>,
    next_sequence: u64,
    sentinel_seen: bool,
}

impl RibApplyStage {
    /// `first_sequence` is the first sequence handed out, one past the last checkpoint
    pub fn new(codec: Arc<dyn ProtocolCodec>, rib: Box<dyn RibApplier>, first_sequence: u64) -> Self {
        Self {
            codec,
            rib,
            next_sequence: first_sequence,
            sentinel_seen: false,
        }
    }

    fn sequenced(&mut self, records: Vec<ChangeRecord>) -> Vec<Envelope> {
        records
            .into_iter()
            .map(|record| {
                let envelope = Envelope::record(record, self.next_sequence);
                self.next_sequence += 1;
                envelope
            })
            .collect()
    }
}

#[async_trait]
impl StageProcessor for RibApplyStage {
    fn stage(&self) -> Stage {
        Stage::RibApply
    }

    async fn on_start(&mut self, _ctx: &StageContext) -> StageResult<()> {
        info!(next_sequence = self.next_sequence, "RIB apply ready");
        Ok(())
    }

    async fn process(
        &mut self,
        envelope: Envelope,
        ctx: &StageContext,
    ) -> StageResult<Vec<Envelope>> {
        if envelope.is_control() {
            self.sentinel_seen = true;
            debug!("Session control envelope received");
            let record = ChangeRecord::new(
                MessageKind::Initiation,
                None,
                envelope.payload.bytes().clone(),
            );
            let mut control = Envelope::record(record, 0);
            control.sequence = Sequence::Control;
            return Ok(vec![control]);
        }

        let bytes = envelope.payload.bytes().clone();
        let message = match self.codec.decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                ctx.metrics.record_decode_error();
                warn!(
                    peer = ?envelope.peer_context,
                    len = envelope.payload.len(),
                    "Discarding undecodable message: {}",
                    e
                );
                return Ok(Vec::new());
            }
        };

        let records = self.rib.apply(&message);
        Ok(self.sequenced(records))
    }

    /// Replays wait until the session control envelope has gone through
    async fn side_event(&mut self, ctx: &StageContext) {
        if !self.sentinel_seen {
            std::future::pending::<()>().await;
        }
        ctx.coordinator.replay_requested().await
    }

    async fn on_side_event(&mut self, ctx: &StageContext) -> StageResult<Vec<Envelope>> {
        if ctx.coordinator.is_shutdown() {
            debug!("Replay skipped during shutdown");
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let snapshot = self.rib.snapshot();
        let first = self.next_sequence;
        let envelopes = self.sequenced(snapshot);
        ctx.metrics.record_replay();
        info!(
            records = envelopes.len(),
            first_sequence = first,
            elapsed = ?started.elapsed(),
            "🔁 Replaying RIB state"
        );
        Ok(envelopes)
    }
}
