//! Bounded experience cache backing agent execution.
//!
//! This module provides:
//! - Append-only recording of task outcomes with access statistics
//! - Batch eviction by recency and frequency once capacity is exceeded
//! - Substring search and embedding-based similarity search over records
//! - An unbounded flat knowledge store with the same access tracking
//!
//! Embeddings are supplied by the caller (see [`crate::llm::LlmClient::embed`]);
//! records without one are invisible to similarity search. The deterministic
//! [`hash_embedding`] helper stands in for a real provider in tests.

pub mod embed;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use embed::{cosine_similarity, hash_embedding, DEFAULT_EMBEDDING_DIM};

/// Default record capacity when none is configured.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Minimum cosine similarity for a record to count as a match.
const SIMILARITY_THRESHOLD: f32 = 0.7;

/// Unique identifier for a cache record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One remembered task outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemoryId,
    /// Record category, e.g. `direct_task` or `failed_task`.
    pub kind: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Vector attached by the caller; absent records are skipped by
    /// similarity search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Entry in the flat knowledge store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Bounded store of past outcomes plus a flat key/value knowledge store.
///
/// # Invariants
/// - After every insert, `len() <= capacity`.
/// - Every lookup that returns a record refreshes its `last_accessed` and
///   increments its `access_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceCache {
    records: Vec<MemoryRecord>,
    #[serde(default = "default_capacity")]
    capacity: usize,
    #[serde(default)]
    knowledge: HashMap<String, KnowledgeEntry>,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl Default for ExperienceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ExperienceCache {
    /// Create a cache holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity: capacity.max(1),
            knowledge: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, oldest insertion first. Does not touch access stats.
    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Append a record, evicting a batch of stale entries if the cache
    /// overflows.
    ///
    /// # Postconditions
    /// - `len() <= capacity`.
    pub fn add(
        &mut self,
        kind: &str,
        content: serde_json::Value,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> MemoryId {
        let now = Utc::now();
        let id = MemoryId::new();
        self.records.push(MemoryRecord {
            id,
            kind: kind.to_string(),
            content,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            metadata: metadata.unwrap_or_default(),
            embedding: None,
        });

        if self.records.len() > self.capacity {
            self.evict();
        }
        id
    }

    /// Drop the least recently and least frequently accessed tenth of
    /// capacity, at minimum one record.
    fn evict(&mut self) {
        self.records
            .sort_by_key(|r| (r.last_accessed, r.access_count));
        let batch = (self.capacity / 10).max(1);
        self.records.drain(..batch.min(self.records.len()));
    }

    /// Fetch a record by id, bumping its access stats.
    pub fn get(&mut self, id: MemoryId) -> Option<&MemoryRecord> {
        let idx = self.records.iter().position(|r| r.id == id)?;
        let record = &mut self.records[idx];
        record.last_accessed = Utc::now();
        record.access_count += 1;
        Some(&self.records[idx])
    }

    /// Attach an embedding to an existing record. Returns `false` when the
    /// record is gone (evicted or never existed).
    pub fn attach_embedding(&mut self, id: MemoryId, embedding: Vec<f32>) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.embedding = Some(embedding);
                true
            }
            None => false,
        }
    }

    /// Case-insensitive substring search over rendered record content.
    ///
    /// Records are scanned in insertion order and at most `limit` are
    /// returned; every hit gets its access stats bumped.
    pub fn search(
        &mut self,
        query: &str,
        kind: Option<&str>,
        limit: usize,
    ) -> Vec<&MemoryRecord> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for (idx, record) in self.records.iter().enumerate() {
            if hits.len() >= limit {
                break;
            }
            if let Some(kind) = kind {
                if record.kind != kind {
                    continue;
                }
            }
            if record.content.to_string().to_lowercase().contains(&needle) {
                hits.push(idx);
            }
        }
        self.touch_and_collect(hits)
    }

    /// Similarity search over records that carry an embedding.
    ///
    /// Returns up to `limit` records whose cosine similarity against
    /// `query` is at least 0.7, ranked descending. Only the returned
    /// records get their access stats bumped.
    pub fn similarity_search(
        &mut self,
        query: &[f32],
        kind: Option<&str>,
        limit: usize,
    ) -> Vec<&MemoryRecord> {
        let mut scored: Vec<(usize, f32)> = Vec::new();
        for (idx, record) in self.records.iter().enumerate() {
            if let Some(kind) = kind {
                if record.kind != kind {
                    continue;
                }
            }
            let Some(embedding) = record.embedding.as_deref() else {
                continue;
            };
            let score = cosine_similarity(query, embedding);
            if score >= SIMILARITY_THRESHOLD {
                scored.push((idx, score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        self.touch_and_collect(scored.into_iter().map(|(idx, _)| idx).collect())
    }

    fn touch_and_collect(&mut self, indices: Vec<usize>) -> Vec<&MemoryRecord> {
        let now = Utc::now();
        for &idx in &indices {
            let record = &mut self.records[idx];
            record.last_accessed = now;
            record.access_count += 1;
        }
        indices.into_iter().map(|idx| &self.records[idx]).collect()
    }

    /// Store a value in the knowledge base, replacing any previous entry.
    pub fn put_knowledge(&mut self, key: &str, value: serde_json::Value) {
        let now = Utc::now();
        self.knowledge.insert(
            key.to_string(),
            KnowledgeEntry {
                value,
                created_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
    }

    /// Fetch a knowledge value, bumping its access stats.
    pub fn get_knowledge(&mut self, key: &str) -> Option<&serde_json::Value> {
        let entry = self.knowledge.get_mut(key)?;
        entry.last_accessed = Utc::now();
        entry.access_count += 1;
        Some(&entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filled(cache: &mut ExperienceCache, n: usize) -> Vec<MemoryId> {
        (0..n)
            .map(|i| cache.add("direct_task", json!({ "task_name": format!("task-{i}") }), None))
            .collect()
    }

    #[test]
    fn get_bumps_access_stats() {
        let mut cache = ExperienceCache::new(10);
        let id = cache.add("direct_task", json!({"task_name": "probe"}), None);

        let first = cache.get(id).map(|r| r.access_count);
        assert_eq!(first, Some(1));
        let second = cache.get(id).map(|r| r.access_count);
        assert_eq!(second, Some(2));
        assert!(cache.get(MemoryId::new()).is_none());
    }

    #[test]
    fn overflow_evicts_least_recently_accessed() {
        let mut cache = ExperienceCache::new(10);
        let ids = filled(&mut cache, 10);
        // Touch everything except the first record so it is the stalest.
        for id in &ids[1..] {
            cache.get(*id);
        }

        let newest = cache.add("direct_task", json!({"task_name": "eleventh"}), None);

        assert_eq!(cache.len(), 10);
        assert!(!cache.records().iter().any(|r| r.id == ids[0]));
        assert!(cache.records().iter().any(|r| r.id == newest));
    }

    #[test]
    fn eviction_drops_tenth_of_capacity() {
        let mut cache = ExperienceCache::new(20);
        filled(&mut cache, 21);
        // One over capacity drops a batch of two.
        assert_eq!(cache.len(), 19);
    }

    #[test]
    fn tiny_capacity_still_stays_bounded() {
        let mut cache = ExperienceCache::new(3);
        filled(&mut cache, 5);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn substring_search_matches_case_insensitively() {
        let mut cache = ExperienceCache::new(10);
        cache.add("direct_task", json!({"task_name": "Research Mars rovers"}), None);
        cache.add("failed_task", json!({"task_name": "Mars landing"}), None);
        cache.add("direct_task", json!({"task_name": "unrelated"}), None);

        let hits = cache.search("mars", Some("direct_task"), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].access_count, 1);

        let both = cache.search("MARS", None, 10);
        assert_eq!(both.len(), 2);

        assert!(cache.search("venus", None, 10).is_empty());
    }

    #[test]
    fn substring_search_honors_limit() {
        let mut cache = ExperienceCache::new(10);
        filled(&mut cache, 5);
        let hits = cache.search("task-", None, 2);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn similarity_search_ranks_and_thresholds() {
        let mut cache = ExperienceCache::new(10);
        let exact = cache.add("direct_task", json!({"task_name": "exact"}), None);
        let close = cache.add("direct_task", json!({"task_name": "close"}), None);
        let far = cache.add("direct_task", json!({"task_name": "far"}), None);
        let bare = cache.add("direct_task", json!({"task_name": "no-embedding"}), None);

        cache.attach_embedding(exact, vec![1.0, 0.0]);
        cache.attach_embedding(close, vec![1.0, 0.3]);
        cache.attach_embedding(far, vec![0.0, 1.0]);
        let _ = bare;

        let hits = cache.similarity_search(&[1.0, 0.0], None, 10);
        let names: Vec<_> = hits.iter().map(|r| r.content["task_name"].as_str()).collect();
        assert_eq!(names, vec![Some("exact"), Some("close")]);
        assert!(hits.iter().all(|r| r.access_count == 1));

        let top = cache.similarity_search(&[1.0, 0.0], None, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].content["task_name"], "exact");
    }

    #[test]
    fn similarity_search_skips_other_kinds() {
        let mut cache = ExperienceCache::new(10);
        let id = cache.add("completed_task", json!({"task_name": "done"}), None);
        cache.attach_embedding(id, vec![1.0, 0.0]);

        assert!(cache.similarity_search(&[1.0, 0.0], Some("direct_task"), 10).is_empty());
        assert_eq!(cache.similarity_search(&[1.0, 0.0], Some("completed_task"), 10).len(), 1);
    }

    #[test]
    fn knowledge_store_tracks_access() {
        let mut cache = ExperienceCache::new(10);
        cache.put_knowledge("domain", json!("aerospace"));

        assert_eq!(cache.get_knowledge("domain"), Some(&json!("aerospace")));
        assert_eq!(cache.knowledge["domain"].access_count, 1);
        assert!(cache.get_knowledge("missing").is_none());

        cache.put_knowledge("domain", json!("marine"));
        assert_eq!(cache.knowledge["domain"].access_count, 0);
    }

    #[test]
    fn serde_round_trip_preserves_records_and_capacity() {
        let mut cache = ExperienceCache::new(42);
        let id = cache.add(
            "direct_task",
            json!({"task_name": "persist me"}),
            Some(HashMap::from([("success".to_string(), json!(true))])),
        );
        cache.attach_embedding(id, vec![0.5, -0.5]);
        cache.put_knowledge("key", json!({"nested": 1}));

        let raw = serde_json::to_string(&cache).unwrap();
        let restored: ExperienceCache = serde_json::from_str(&raw).unwrap();

        assert_eq!(restored.capacity(), 42);
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.records()[0].id, id);
        assert_eq!(restored.records()[0].embedding, Some(vec![0.5, -0.5]));
        assert_eq!(restored.knowledge["key"].value, json!({"nested": 1}));
    }

    #[test]
    fn missing_capacity_field_defaults() {
        let restored: ExperienceCache =
            serde_json::from_value(json!({ "records": [] })).unwrap();
        assert_eq!(restored.capacity(), DEFAULT_CAPACITY);
    }
}
