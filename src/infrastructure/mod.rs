// Copyright 2025 Cowboy AI, LLC.

//! Infrastructure layer
//!
//! NATS connectivity shared by the event source, the publishers and the
//! KV-backed stores.

pub mod nats_client;

pub use nats_client::{NatsClient, NatsConfig, NatsError};
