//! Fuzzing harnesses for the kestrel buffer queue.
//!
//! The op-sequence model drives the real queue (it is pure in-memory
//! state, so no platform resources are involved) and re-checks the
//! structural invariants after every step.

pub mod queue_model;
