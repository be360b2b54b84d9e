//! Bolero fuzzer for the buffer queue's slot state machine.
//!
//! Drives the real queue with arbitrary operation sequences and checks,
//! after every operation:
//! - queued slots and the FIFO stay in lockstep
//! - FIFO frame numbers are strictly increasing
//! - the acquired-buffer cap holds
//! - invalid transitions (queue without request, over-acquire, stale
//!   release) are rejected, never absorbed

use bolero::check;
use kestrel_fuzz::queue_model::{execute_and_verify, QueueOp};

fn main() {
    check!().with_type::<Vec<RawOp>>().for_each(|ops| {
        let ops: Vec<QueueOp> = ops.iter().map(RawOp::lower).collect();
        if let Err(e) = execute_and_verify(&ops) {
            panic!("invariant violated: {e}");
        }
    });
}

/// Compact generator-friendly encoding of [`QueueOp`].
#[derive(Debug, Clone, bolero::TypeGenerator)]
enum RawOp {
    Dequeue { async_mode: bool },
    Request(u8),
    Queue { pick: u8, async_mode: bool },
    Cancel(u8),
    Acquire,
    Release(u8),
    SetBufferCount(u8),
    SetAsyncMode(bool),
}

impl RawOp {
    fn lower(&self) -> QueueOp {
        match *self {
            RawOp::Dequeue { async_mode } => QueueOp::Dequeue { async_mode },
            RawOp::Request(pick) => QueueOp::Request { pick: pick as usize },
            RawOp::Queue { pick, async_mode } => QueueOp::Queue {
                pick: pick as usize,
                async_mode,
            },
            RawOp::Cancel(pick) => QueueOp::Cancel { pick: pick as usize },
            RawOp::Acquire => QueueOp::Acquire,
            RawOp::Release(pick) => QueueOp::Release { pick: pick as usize },
            RawOp::SetBufferCount(count) => QueueOp::SetBufferCount {
                count: count as usize,
            },
            RawOp::SetAsyncMode(enabled) => QueueOp::SetAsyncMode { enabled },
        }
    }
}
