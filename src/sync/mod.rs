// Copyright 2025 Cowboy AI, LLC.

//! Event to graph synchronization

pub mod assignment;
pub mod dead_letter;
pub mod synchronizer;

pub use assignment::{assign, retire_driver_binding, unassign, Assignment};
pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, JetStreamDeadLetterSink};
pub use synchronizer::{Ack, GraphSynchronizer, SyncObserver};
