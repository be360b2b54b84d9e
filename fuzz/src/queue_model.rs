//! Op-sequence driver for the buffer queue.
//!
//! Executes arbitrary operation sequences against a real queue and verifies
//! the structural invariants after every operation:
//!
//! - the number of queued slots equals the FIFO length, and every FIFO item
//!   refers to a queued slot
//! - FIFO frame numbers are strictly increasing
//! - the consumer never holds more than its acquired-buffer cap
//! - the frame counter never goes backwards
//!
//! Blocking dequeues are sidestepped (the driver skips a dequeue that would
//! wait); everything else calls straight into the queue.

use std::collections::HashSet;
use std::sync::Arc;

use kestrel_core::{
    BufferUsage, ConsumerListener, Fence, PixelFormat, ProducerApi, QueueError, Rect, ScalingMode,
    SlotState, TransformFlags,
};
use kestrel_queue::{
    create_pair, Consumer, CoreSnapshot, Producer, QueueBufferInput, SLOT_COUNT,
};

/// Operations the driver can perform. Slot-picking ops index into the
/// driver's outstanding lists, so every generated value maps to something
/// meaningful.
#[derive(Clone, Debug)]
pub enum QueueOp {
    /// Dequeue a buffer (skipped when it would block).
    Dequeue { async_mode: bool },
    /// Fetch the handle of an outstanding dequeued slot.
    Request { pick: usize },
    /// Queue an outstanding dequeued slot.
    Queue { pick: usize, async_mode: bool },
    /// Cancel an outstanding dequeued slot.
    Cancel { pick: usize },
    /// Acquire the FIFO head.
    Acquire,
    /// Release an acquired slot.
    Release { pick: usize },
    /// Set or clear the buffer-count override.
    SetBufferCount { count: usize },
    /// Latch async mode.
    SetAsyncMode { enabled: bool },
}

struct NullListener;

impl ConsumerListener for NullListener {
    fn on_frame_available(&self) {}
}

/// Driver-side mirror of the producer/consumer bookkeeping.
#[derive(Default)]
struct Tracker {
    /// Slots handed out by dequeue and not yet queued or cancelled.
    dequeued: Vec<usize>,
    /// Subset of `dequeued` whose handle has been requested.
    requested: HashSet<usize>,
    /// Frames handed out by acquire and not yet released.
    acquired: Vec<(usize, u64)>,
    /// Producer-side async latch.
    async_latch: bool,
    /// Last observed frame counter.
    last_frame_counter: u64,
    next_timestamp: i64,
}

impl Tracker {
    fn effective_async(&self, per_call: bool) -> bool {
        per_call || self.async_latch
    }

    /// Mirror of the queue's buffer-count arithmetic (defaults: async
    /// buffer enabled, default max of 2).
    fn max_buffer_count(&self, snapshot: &CoreSnapshot, async_mode: bool) -> usize {
        let min_max = if async_mode { 3 } else { 2 };
        let count = if snapshot.override_max_buffer_count != 0 {
            snapshot.override_max_buffer_count
        } else {
            min_max.max(2)
        };
        count.min(SLOT_COUNT)
    }
}

fn input(timestamp: i64, async_mode: bool) -> QueueBufferInput {
    QueueBufferInput {
        timestamp,
        is_auto_timestamp: false,
        crop: Rect::EMPTY,
        scaling_mode: ScalingMode::Freeze.as_raw(),
        transform: TransformFlags::empty(),
        async_mode,
        fence: Fence::NO_FENCE,
    }
}

/// Execute a sequence of operations and verify invariants after each one.
pub fn execute_and_verify(ops: &[QueueOp]) -> Result<(), String> {
    let (producer, consumer) = create_pair(None);
    consumer
        .consumer_connect(Arc::new(NullListener), false)
        .map_err(|e| format!("consumer_connect failed: {e}"))?;
    producer
        .connect(ProducerApi::Cpu, false)
        .map_err(|e| format!("connect failed: {e}"))?;

    let mut tracker = Tracker::default();

    for (i, op) in ops.iter().enumerate() {
        step(&producer, &consumer, &mut tracker, op)
            .map_err(|e| format!("op {i} ({op:?}): {e}"))?;
        verify_invariants(&consumer.snapshot(), &mut tracker)
            .map_err(|e| format!("after op {i} ({op:?}): {e}"))?;
    }

    Ok(())
}

fn step(
    producer: &Producer,
    consumer: &Consumer,
    tracker: &mut Tracker,
    op: &QueueOp,
) -> Result<(), String> {
    match op {
        QueueOp::Dequeue { async_mode } => {
            let async_mode = tracker.effective_async(*async_mode);
            let snapshot = consumer.snapshot();
            let ceiling = tracker.max_buffer_count(&snapshot, async_mode);
            let has_free = snapshot.slots[..ceiling]
                .iter()
                .any(|s| s.state == SlotState::Free);
            if !has_free {
                return Ok(()); // would block; skip
            }
            match producer.dequeue_buffer(
                async_mode,
                8,
                8,
                PixelFormat::RGBA_8888,
                BufferUsage::empty(),
            ) {
                Ok(d) => {
                    if tracker.dequeued.contains(&d.slot) {
                        return Err(format!("dequeue returned slot {} twice", d.slot));
                    }
                    tracker.dequeued.push(d.slot);
                }
                Err(
                    QueueError::MultipleDequeue { .. } | QueueError::MinUndequeuedExceeded { .. },
                ) => {}
                Err(e) => return Err(format!("unexpected dequeue error: {e}")),
            }
        }
        QueueOp::Request { pick } => {
            if tracker.dequeued.is_empty() {
                return Ok(());
            }
            let slot = tracker.dequeued[pick % tracker.dequeued.len()];
            producer
                .request_buffer(slot)
                .map_err(|e| format!("request_buffer({slot}) failed: {e}"))?;
            tracker.requested.insert(slot);
        }
        QueueOp::Queue { pick, async_mode } => {
            if tracker.dequeued.is_empty() {
                return Ok(());
            }
            let idx = pick % tracker.dequeued.len();
            let slot = tracker.dequeued[idx];
            tracker.next_timestamp += 1;
            let result = producer.queue_buffer(
                slot,
                input(tracker.next_timestamp, tracker.effective_async(*async_mode)),
            );
            if tracker.requested.contains(&slot) {
                match result {
                    Ok(_) => {
                        tracker.dequeued.remove(idx);
                        tracker.requested.remove(&slot);
                    }
                    // The ceiling may have shrunk (async latch dropped)
                    // below a slot dequeued under a larger one; the slot
                    // stays dequeued.
                    Err(QueueError::SlotOutOfRange { .. }) => {}
                    Err(e) => return Err(format!("queue_buffer({slot}) failed: {e}")),
                }
            } else {
                match result {
                    Err(QueueError::BufferNotRequested { .. }) => {}
                    Ok(_) => return Err(format!("queue_buffer({slot}) without request succeeded")),
                    Err(e) => return Err(format!("unexpected queue error: {e}")),
                }
            }
        }
        QueueOp::Cancel { pick } => {
            if tracker.dequeued.is_empty() {
                return Ok(());
            }
            let idx = pick % tracker.dequeued.len();
            let slot = tracker.dequeued.remove(idx);
            tracker.requested.remove(&slot);
            producer
                .cancel_buffer(slot, Fence::NO_FENCE)
                .map_err(|e| format!("cancel_buffer({slot}) failed: {e}"))?;
        }
        QueueOp::Acquire => {
            let before = consumer.snapshot();
            let acquired_before = before
                .slots
                .iter()
                .filter(|s| s.state == SlotState::Acquired)
                .count();
            match consumer.acquire_buffer(0) {
                Ok(item) => {
                    if acquired_before >= 1 {
                        return Err("acquire succeeded past the acquired cap".into());
                    }
                    if before.queue.is_empty() {
                        return Err("acquire succeeded on an empty FIFO".into());
                    }
                    tracker.acquired.push((item.slot, item.frame_number));
                }
                Err(QueueError::MaxAcquiredExceeded { .. }) => {
                    if acquired_before == 0 {
                        return Err("spurious MaxAcquiredExceeded".into());
                    }
                }
                Err(QueueError::NoBufferAvailable) => {
                    if !before.queue.is_empty() && acquired_before == 0 {
                        return Err("spurious NoBufferAvailable".into());
                    }
                }
                Err(e) => return Err(format!("unexpected acquire error: {e}")),
            }
        }
        QueueOp::Release { pick } => {
            if tracker.acquired.is_empty() {
                return Ok(());
            }
            let idx = pick % tracker.acquired.len();
            let (slot, frame) = tracker.acquired.remove(idx);
            consumer
                .release_buffer(slot, frame, Fence::NO_FENCE)
                .map_err(|e| format!("release_buffer({slot}, {frame}) failed: {e}"))?;
        }
        QueueOp::SetBufferCount { count } => {
            let count = count % (SLOT_COUNT + 4);
            let result = producer.set_buffer_count(count);
            // mirror the queue's own validation order
            if count > SLOT_COUNT {
                match result {
                    Err(QueueError::BufferCountTooLarge { .. }) => {}
                    other => return Err(format!("oversized set_buffer_count returned {other:?}")),
                }
            } else if !tracker.dequeued.is_empty() {
                match result {
                    Err(QueueError::SlotsOwnedByProducer) => {}
                    other => {
                        return Err(format!(
                            "set_buffer_count with dequeued slots returned {other:?}"
                        ))
                    }
                }
            } else if count == 0 {
                result.map_err(|e| format!("clearing the override failed: {e}"))?;
            } else if count < 2 {
                match result {
                    Err(QueueError::BufferCountTooSmall { .. }) => {}
                    other => return Err(format!("undersized set_buffer_count returned {other:?}")),
                }
            } else {
                result.map_err(|e| format!("set_buffer_count({count}) failed: {e}"))?;
                // every slot was freed; outstanding acquisitions are void
                tracker.acquired.clear();
            }
        }
        QueueOp::SetAsyncMode { enabled } => {
            producer
                .set_async_mode(*enabled)
                .map_err(|e| format!("set_async_mode failed: {e}"))?;
            tracker.async_latch = *enabled;
        }
    }
    Ok(())
}

fn verify_invariants(snapshot: &CoreSnapshot, tracker: &mut Tracker) -> Result<(), String> {
    // Invariant: queued slots and FIFO agree.
    let queued_slots = snapshot
        .slots
        .iter()
        .filter(|s| s.state == SlotState::Queued)
        .count();
    if queued_slots != snapshot.queue.len() {
        return Err(format!(
            "{} queued slots but FIFO length {}",
            queued_slots,
            snapshot.queue.len()
        ));
    }
    let mut seen = HashSet::new();
    for item in &snapshot.queue {
        if !seen.insert(item.slot) {
            return Err(format!("slot {} appears twice in the FIFO", item.slot));
        }
        if snapshot.slots[item.slot].state != SlotState::Queued {
            return Err(format!(
                "FIFO item refers to slot {} in state {:?}",
                item.slot, snapshot.slots[item.slot].state
            ));
        }
    }

    // Invariant: FIFO frame numbers strictly increase.
    for pair in snapshot.queue.windows(2) {
        if pair[0].frame_number >= pair[1].frame_number {
            return Err(format!(
                "FIFO frame numbers not increasing: {} then {}",
                pair[0].frame_number, pair[1].frame_number
            ));
        }
    }

    // Invariant: acquired count within the cap (default of 1).
    let acquired = snapshot
        .slots
        .iter()
        .filter(|s| s.state == SlotState::Acquired)
        .count();
    if acquired > 1 {
        return Err(format!("{acquired} slots acquired, cap is 1"));
    }

    // Invariant: the frame counter never goes backwards.
    if snapshot.frame_counter < tracker.last_frame_counter {
        return Err(format!(
            "frame counter went backwards: {} -> {}",
            tracker.last_frame_counter, snapshot.frame_counter
        ));
    }
    tracker.last_frame_counter = snapshot.frame_counter;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_sequence() {
        execute_and_verify(&[
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Request { pick: 0 },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
            QueueOp::Acquire,
            QueueOp::Release { pick: 0 },
        ])
        .unwrap();
    }

    #[test]
    fn test_queue_without_request_is_rejected() {
        execute_and_verify(&[
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
        ])
        .unwrap();
    }

    #[test]
    fn test_async_drop_preserves_invariants() {
        let mut ops = Vec::new();
        for _ in 0..6 {
            ops.push(QueueOp::Dequeue { async_mode: true });
            ops.push(QueueOp::Request { pick: 0 });
            ops.push(QueueOp::Queue {
                pick: 0,
                async_mode: true,
            });
        }
        execute_and_verify(&ops).unwrap();
    }

    #[test]
    fn test_buffer_count_churn() {
        execute_and_verify(&[
            QueueOp::SetBufferCount { count: 4 },
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Request { pick: 0 },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
            QueueOp::Acquire,
            QueueOp::SetBufferCount { count: 8 },
            QueueOp::Cancel { pick: 0 },
            QueueOp::SetBufferCount { count: 8 },
            QueueOp::Release { pick: 0 },
            QueueOp::SetBufferCount { count: 0 },
        ])
        .unwrap();
    }

    #[test]
    fn test_interleaved_sequences_hold_invariants() {
        // a deterministic mixed workload, the shape the fuzzer explores
        let ops = [
            QueueOp::SetBufferCount { count: 5 },
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Request { pick: 0 },
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Request { pick: 1 },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
            QueueOp::Acquire,
            QueueOp::Acquire,
            QueueOp::Release { pick: 0 },
            QueueOp::Acquire,
            QueueOp::Release { pick: 0 },
            QueueOp::SetAsyncMode { enabled: true },
            QueueOp::Dequeue { async_mode: false },
            QueueOp::Request { pick: 0 },
            QueueOp::Queue {
                pick: 0,
                async_mode: false,
            },
            QueueOp::Acquire,
            QueueOp::Release { pick: 0 },
        ];
        execute_and_verify(&ops).unwrap();
    }
}
