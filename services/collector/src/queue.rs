//! # Envelope Queue
//!
//! One bounded FIFO lane per stage.
//!
//! ## Flow Control
//!
//! The configured capacity is split evenly across the lanes (at least one slot each), and
//! every queued envelope holds a permit of its lane's fair semaphore.
//! [`EnvelopeQueue::enqueue`] waits for space in the destination lane only, so a stage
//! handing off never waits behind ingest filling stage 0. The wait graph runs one way,
//! stage 0 towards stage 3, and the terminal stage never enqueues: a full lane always
//! empties, and backpressure from the slowest stage reaches the producers through the
//! lanes in front of it. [`EnvelopeQueue::depth`] sums all lanes.
//!
//! ## Ordering
//!
//! Each lane has exactly one consumer, so envelopes destined for the same stage are
//! delivered in the order they were enqueued no matter how traffic for other stages
//! interleaves.
//!
//! ## Closing
//!
//! [`EnvelopeQueue::close`] stops admission to a lane. Envelopes already in the lane are
//! still delivered; once it is empty `dequeue` returns `None`. Shutdown closes the stage-0
//! lane and each worker closes the next lane when it exits, draining the chain in order.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};
use types::{Envelope, Stage, STAGE_COUNT};

use crate::error::QueueError;

struct Lane {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    permits: Semaphore,
    depth: AtomicUsize,
    /// Set when the lane was discarded while its receiver was busy
    orphaned: AtomicBool,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: tokio::sync::Mutex::new(receiver),
            permits: Semaphore::new(capacity),
            depth: AtomicUsize::new(0),
            orphaned: AtomicBool::new(false),
        }
    }

    fn release(&self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
        self.permits.add_permits(1);
    }

    /// Drop everything left in the lane, returning its capacity
    fn drain_orphaned(&self, receiver: &mut mpsc::UnboundedReceiver<Envelope>) -> usize {
        receiver.close();
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            self.release();
            dropped += 1;
        }
        dropped
    }
}

pub struct EnvelopeQueue {
    lane_capacity: usize,
    lanes: [Lane; STAGE_COUNT],
    admitted: AtomicU64,
}

impl EnvelopeQueue {
    pub fn new(capacity: usize) -> Self {
        let lane_capacity = (capacity / STAGE_COUNT).clamp(1, Semaphore::MAX_PERMITS);
        Self {
            lane_capacity,
            lanes: [
                Lane::new(lane_capacity),
                Lane::new(lane_capacity),
                Lane::new(lane_capacity),
                Lane::new(lane_capacity),
            ],
            admitted: AtomicU64::new(0),
        }
    }

    /// Total slots across every lane
    pub fn capacity(&self) -> usize {
        self.lane_capacity * STAGE_COUNT
    }

    pub fn lane_capacity(&self) -> usize {
        self.lane_capacity
    }

    /// Envelopes queued across every lane
    pub fn depth(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.depth.load(Ordering::Acquire))
            .sum()
    }

    pub fn lane_depth(&self, stage: Stage) -> usize {
        self.lanes[stage.index()].depth.load(Ordering::Acquire)
    }

    /// Envelopes accepted into the stage-0 lane since creation
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Append `envelope` to the lane named by its stage tag, waiting while that lane is full
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), QueueError> {
        let stage = envelope.stage;
        let lane = &self.lanes[stage.index()];
        if lane.sender.lock().is_none() {
            return Err(QueueError::Closed(stage));
        }

        let permit = lane
            .permits
            .acquire()
            .await
            .map_err(|_| QueueError::Closed(stage))?;

        // Lane may have closed while waiting for space; the permit is returned on drop
        let guard = lane.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(QueueError::Closed(stage));
        };
        lane.depth.fetch_add(1, Ordering::AcqRel);
        if sender.send(envelope).is_err() {
            lane.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Closed(stage));
        }
        drop(guard);

        permit.forget();
        if stage == Stage::RibApply {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Next envelope for `stage`; `None` once the lane is closed and empty
    ///
    /// Cancel safe: an envelope is never lost when the returned future is dropped.
    pub async fn dequeue(&self, stage: Stage) -> Option<Envelope> {
        let lane = &self.lanes[stage.index()];
        let mut receiver = lane.receiver.lock().await;
        if lane.orphaned.load(Ordering::Acquire) {
            let dropped = lane.drain_orphaned(&mut receiver);
            if dropped > 0 {
                warn!(stage = %stage, dropped, "Discarded envelopes left in an orphaned lane");
            }
            return None;
        }
        let envelope = receiver.recv().await?;
        lane.release();
        Some(envelope)
    }

    /// Stop admitting envelopes to `stage`'s lane
    pub fn close(&self, stage: Stage) {
        if self.lanes[stage.index()].sender.lock().take().is_some() {
            debug!(stage = %stage, "Lane closed");
        }
    }

    pub fn is_closed(&self, stage: Stage) -> bool {
        self.lanes[stage.index()].sender.lock().is_none()
    }

    /// Close `stage`'s lane and drop whatever it still holds
    ///
    /// Used when a stage's worker is gone and nothing will consume the lane again. Returns
    /// the number of envelopes dropped here. If the receiver is busy, the lane is marked
    /// orphaned and whoever holds it drops the remainder on its next `dequeue`.
    pub fn discard(&self, stage: Stage) -> usize {
        self.close(stage);
        let lane = &self.lanes[stage.index()];
        lane.orphaned.store(true, Ordering::Release);
        let Ok(mut receiver) = lane.receiver.try_lock() else {
            warn!(
                stage = %stage,
                queued = lane.depth.load(Ordering::Acquire),
                "Orphaned lane is still being read, deferring discard to its reader"
            );
            return 0;
        };

        let dropped = lane.drain_orphaned(&mut receiver);
        if dropped > 0 {
            warn!(stage = %stage, dropped, "Discarded envelopes left in an orphaned lane");
        }
        dropped
    }
}

impl std::fmt::Debug for EnvelopeQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeQueue")
            .field("capacity", &self.capacity())
            .field("depth", &self.depth())
            .finish()
    }
}
