// Copyright 2025 Cowboy AI, LLC.

//! Graph store over a NATS JetStream key-value bucket
//!
//! The graph is kept as an adjacency list:
//!
//! - `node.<Label>.<key>` holds one [`Node`]
//! - `edge.<TYPE>.<Label>.<key>` holds the [`EdgeSet`] of one type leaving one node
//! - `lock.<name>` holds an advisory lock record
//!
//! Each record is rewritten with compare-and-swap on its revision, and a
//! [`GraphMutation::Require`] is checked against the same read the swap is
//! conditioned on. A batch touching several records remembers their prior
//! values and restores them if a later record cannot be written, unless
//! another writer has replaced the record since.

use super::mutation::{
    apply_to_edges, apply_to_node, check_requirement, BatchOutcome, GraphMutation, MutationTarget,
};
use super::node::{Node, NodeLabel, NodeRef};
use super::relationship::{EdgeSet, Relationship, RelationshipType};
use super::store::GraphStore;
use crate::errors::GraphStoreError;
use async_nats::jetstream::{self, kv};
use async_nats::Client;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

const MAX_CAS_ATTEMPTS: usize = 3;

/// Configuration for the KV-backed graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsKvGraphConfig {
    /// KV bucket name
    pub bucket_name: String,
    /// History depth for KV entries
    pub history: i64,
}

impl Default for NatsKvGraphConfig {
    fn default() -> Self {
        Self {
            bucket_name: "logistics-graph".to_string(),
            history: 5,
        }
    }
}

/// Graph store backed by a JetStream KV bucket
pub struct NatsKvGraphStore {
    kv: kv::Store,
    config: NatsKvGraphConfig,
}

impl fmt::Debug for NatsKvGraphStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsKvGraphStore")
            .field("bucket", &self.config.bucket_name)
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    owner: String,
    expires_at: DateTime<Utc>,
}

struct Rollback {
    key: String,
    prior: Option<Bytes>,
    revision: u64,
}

impl NatsKvGraphStore {
    /// Open the bucket, creating it when missing
    pub async fn new(client: Client, config: NatsKvGraphConfig) -> Result<Self, GraphStoreError> {
        let js = jetstream::new(client);
        let kv = match js.get_key_value(&config.bucket_name).await {
            Ok(kv) => kv,
            Err(_) => js
                .create_key_value(kv::Config {
                    bucket: config.bucket_name.clone(),
                    history: config.history,
                    storage: jetstream::stream::StorageType::File,
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    GraphStoreError::Unavailable(format!("Failed to create KV bucket: {}", e))
                })?,
        };
        Ok(Self { kv, config })
    }

    /// Bucket name
    pub fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    async fn read(&self, key: &str) -> Result<(Option<Bytes>, Option<u64>), GraphStoreError> {
        let entry = self
            .kv
            .entry(key)
            .await
            .map_err(|e| GraphStoreError::Unavailable(format!("Failed to read {}: {}", key, e)))?;
        Ok(match entry {
            Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                (Some(entry.value), Some(entry.revision))
            }
            _ => (None, None),
        })
    }

    async fn write(&self, key: &str, value: Bytes, revision: Option<u64>) -> Result<u64, String> {
        match revision {
            Some(revision) => self
                .kv
                .update(key, value, revision)
                .await
                .map_err(|e| e.to_string()),
            None => self.kv.create(key, value).await.map_err(|e| e.to_string()),
        }
    }

    /// Read-modify-write one record, returning the change count and its prior value
    async fn write_target(
        &self,
        target: &MutationTarget,
        mutations: &[&GraphMutation],
    ) -> Result<(usize, Option<Rollback>), GraphStoreError> {
        let key = target_key(target);
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let (prior, revision) = self.read(&key).await?;

            let (changed, encoded) = match target {
                MutationTarget::Node(_) => {
                    let mut record: Option<Node> = prior
                        .as_ref()
                        .map(|raw| serde_json::from_slice(raw))
                        .transpose()?;
                    for mutation in mutations {
                        check_requirement(record.as_ref(), mutation)?;
                    }
                    let changed = mutations
                        .iter()
                        .filter(|m| apply_to_node(&mut record, m))
                        .count();
                    (changed, serde_json::to_vec(&record)?)
                }
                MutationTarget::Edges(_, _) => {
                    let mut set: EdgeSet = prior
                        .as_ref()
                        .map(|raw| serde_json::from_slice(raw))
                        .transpose()?
                        .unwrap_or_default();
                    let changed = mutations
                        .iter()
                        .filter(|m| apply_to_edges(&mut set, m))
                        .count();
                    (changed, serde_json::to_vec(&set)?)
                }
            };
            if changed == 0 {
                return Ok((0, None));
            }

            match self.write(&key, Bytes::from(encoded), revision).await {
                Ok(written) => {
                    debug!(key = %key, changed, "Graph record written");
                    return Ok((
                        changed,
                        Some(Rollback {
                            key,
                            prior,
                            revision: written,
                        }),
                    ));
                }
                Err(reason) if attempt < MAX_CAS_ATTEMPTS => {
                    debug!(key = %key, attempt, reason = %reason, "Compare-and-swap lost, re-reading");
                }
                Err(reason) => {
                    return Err(GraphStoreError::Conflict(format!("{}: {}", key, reason)));
                }
            }
        }
        Err(GraphStoreError::Conflict(key))
    }

    async fn roll_back(&self, written: Vec<Rollback>) {
        for Rollback { key, prior, revision } in written.into_iter().rev() {
            let restored = match prior {
                Some(value) => self
                    .kv
                    .update(&key, value, revision)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                None => self
                    .kv
                    .delete_expect_revision(&key, Some(revision))
                    .await
                    .map_err(|e| e.to_string()),
            };
            if let Err(reason) = restored {
                error!(key = %key, reason = %reason, "Failed to roll back graph record");
            }
        }
    }
}

#[async_trait]
impl GraphStore for NatsKvGraphStore {
    async fn apply(&self, batch: Vec<GraphMutation>) -> Result<BatchOutcome, GraphStoreError> {
        let mut grouped: BTreeMap<MutationTarget, Vec<&GraphMutation>> = BTreeMap::new();
        for mutation in &batch {
            grouped.entry(mutation.target()).or_default().push(mutation);
        }

        let mut outcome = BatchOutcome {
            changed: 0,
            total: batch.len(),
        };
        let mut written = Vec::new();
        for (target, mutations) in &grouped {
            match self.write_target(target, mutations).await {
                Ok((changed, rollback)) => {
                    outcome.changed += changed;
                    written.extend(rollback);
                }
                Err(err) => {
                    warn!(error = %err, records = written.len(), "Batch failed, rolling back");
                    self.roll_back(written).await;
                    return Err(err);
                }
            }
        }
        Ok(outcome)
    }

    async fn node(&self, node: &NodeRef) -> Result<Option<Node>, GraphStoreError> {
        let (value, _) = self.read(&node_key(node)).await?;
        value
            .map(|raw| serde_json::from_slice(&raw).map_err(GraphStoreError::from))
            .transpose()
    }

    async fn nodes_by_label(&self, label: NodeLabel) -> Result<Vec<Node>, GraphStoreError> {
        let prefix = format!("node.{}.", label);
        let keys: Vec<String> = self
            .kv
            .keys()
            .await
            .map_err(|e| GraphStoreError::Unavailable(format!("Failed to list keys: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| GraphStoreError::Unavailable(format!("Failed to list keys: {}", e)))?;

        let mut nodes = Vec::new();
        for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
            if let (Some(raw), _) = self.read(key).await? {
                nodes.push(serde_json::from_slice::<Node>(&raw)?);
            }
        }
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(nodes)
    }

    async fn outgoing(
        &self,
        from: &NodeRef,
        rel_type: RelationshipType,
    ) -> Result<Vec<Relationship>, GraphStoreError> {
        let (value, _) = self.read(&edge_key(from, rel_type)).await?;
        let set: EdgeSet = value
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()?
            .unwrap_or_default();
        Ok(set.edges)
    }

    async fn try_lock(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, GraphStoreError> {
        let key = lock_key(name);
        let now = Utc::now();
        let record = LockRecord {
            owner: owner.to_string(),
            expires_at: now + chrono::Duration::milliseconds(ttl.as_millis() as i64),
        };
        let encoded = Bytes::from(serde_json::to_vec(&record)?);

        let (current, revision) = self.read(&key).await?;
        if let Some(raw) = current {
            let held: LockRecord = serde_json::from_slice(&raw)?;
            if held.owner != owner && held.expires_at > now {
                return Ok(false);
            }
        }
        Ok(self.write(&key, encoded, revision).await.is_ok())
    }

    async fn unlock(&self, name: &str, owner: &str) -> Result<(), GraphStoreError> {
        let key = lock_key(name);
        let (Some(raw), Some(revision)) = self.read(&key).await? else {
            return Ok(());
        };
        if !held_by(&raw, owner)? {
            return Ok(());
        }
        if let Err(e) = self.kv.delete_expect_revision(&key, Some(revision)).await {
            // Lost the swap: the lock expired and was taken over, or is already gone.
            let (current, _) = self.read(&key).await?;
            match current {
                Some(raw) if held_by(&raw, owner)? => {
                    return Err(GraphStoreError::Unavailable(format!(
                        "Failed to release {}: {}",
                        key, e
                    )))
                }
                _ => debug!(lock = %name, "Lock no longer ours, leaving it"),
            }
        }
        Ok(())
    }
}

/// Builder for [`NatsKvGraphStore`]
pub struct NatsKvGraphStoreBuilder {
    client: Option<Client>,
    config: NatsKvGraphConfig,
}

impl NatsKvGraphStoreBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            client: None,
            config: NatsKvGraphConfig::default(),
        }
    }

    /// Set the NATS client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the bucket name
    pub fn bucket_name(mut self, name: impl Into<String>) -> Self {
        self.config.bucket_name = name.into();
        self
    }

    /// Set the history depth
    pub fn history(mut self, history: i64) -> Self {
        self.config.history = history;
        self
    }

    /// Build the store
    pub async fn build(self) -> Result<NatsKvGraphStore, GraphStoreError> {
        let client = self
            .client
            .ok_or_else(|| GraphStoreError::Unavailable("NATS client not provided".to_string()))?;
        NatsKvGraphStore::new(client, self.config).await
    }
}

impl Default for NatsKvGraphStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Escape a key segment into the KV key alphabet
///
/// ASCII letters, digits and `-` pass through; every other byte becomes `_HH`.
pub fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

fn node_key(node: &NodeRef) -> String {
    format!("node.{}.{}", node.label, encode_segment(&node.key))
}

fn edge_key(from: &NodeRef, rel_type: RelationshipType) -> String {
    format!("edge.{}.{}.{}", rel_type, from.label, encode_segment(&from.key))
}

fn lock_key(name: &str) -> String {
    format!("lock.{}", encode_segment(name))
}

fn held_by(raw: &[u8], owner: &str) -> Result<bool, GraphStoreError> {
    let held: LockRecord = serde_json::from_slice(raw)?;
    Ok(held.owner == owner)
}

fn target_key(target: &MutationTarget) -> String {
    match target {
        MutationTarget::Node(node) => node_key(node),
        MutationTarget::Edges(from, rel_type) => edge_key(from, *rel_type),
    }
}
