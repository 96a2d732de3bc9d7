//! Shared fixtures for weight cache tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edgepool_abstraction::ModelType;
use edgepool_models::{
    CacheEntry, CacheError, CacheResult, CachedModelInfo, LoadProgress, ModelMetadata,
    SqliteWeightStore, WeightFetcher, WeightStore, WeightStream,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory fetcher serving fixed blobs and counting requests.
pub struct FakeFetcher {
    blobs: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
    announce_length: bool,
    chunk_size: usize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self { blobs: HashMap::new(), calls: AtomicUsize::new(0), announce_length: true, chunk_size: 4 }
    }

    pub fn with_blob(mut self, url: &str, body: Vec<u8>) -> Self {
        self.blobs.insert(url.to_string(), body);
        self
    }

    pub fn without_content_length(mut self) -> Self {
        self.announce_length = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeightFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<WeightStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .blobs
            .get(url)
            .cloned()
            .ok_or_else(|| CacheError::Network(format!("HTTP 404 for {url}")))?;

        let content_length = self.announce_length.then_some(body.len() as u64);
        let chunks: Vec<CacheResult<Bytes>> =
            body.chunks(self.chunk_size).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        Ok(WeightStream { content_length, chunks: futures::stream::iter(chunks).boxed() })
    }
}

/// Store whose deletes always fail, recording attempted writes.
pub struct FailingDeleteStore {
    inner: SqliteWeightStore,
    puts: AtomicUsize,
}

impl FailingDeleteStore {
    pub fn new(inner: SqliteWeightStore) -> Self {
        Self { inner, puts: AtomicUsize::new(0) }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeightStore for FailingDeleteStore {
    async fn initialize(&self) -> CacheResult<()> {
        self.inner.initialize().await
    }

    async fn get(&self, model_id: &str) -> CacheResult<Option<CacheEntry>> {
        self.inner.get(model_id).await
    }

    async fn put(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(entry).await
    }

    async fn delete(&self, _model_id: &str) -> CacheResult<bool> {
        Err(CacheError::Storage("disk is read-only".to_string()))
    }

    async fn list(&self) -> CacheResult<Vec<CachedModelInfo>> {
        self.inner.list().await
    }

    async fn touch(&self, model_id: &str, last_used: DateTime<Utc>) -> CacheResult<bool> {
        self.inner.touch(model_id, last_used).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.inner.clear().await
    }
}

pub fn url_for(model_id: &str) -> String {
    format!("https://weights.invalid/{model_id}.bin")
}

pub fn metadata(model_id: &str, model_type: ModelType, size: u64) -> ModelMetadata {
    ModelMetadata::new(model_id, model_type, "1.0.0", size, url_for(model_id))
}

pub fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

/// A stored entry of `size` bytes last used `age_secs` before `base_time()`.
pub fn stored_entry(model_id: &str, size: usize, age_secs: i64) -> CacheEntry {
    let at = base_time() - chrono::Duration::seconds(age_secs);
    CacheEntry {
        model_id: model_id.to_string(),
        model_type: ModelType::Vision,
        version: "1.0.0".to_string(),
        weights: Bytes::from(vec![0u8; size]),
        size_bytes: size as u64,
        cached_at: at,
        last_used: at,
    }
}

/// Collects progress updates reported by `load_model`.
#[derive(Default)]
pub struct ProgressLog {
    updates: Mutex<Vec<LoadProgress>>,
}

impl ProgressLog {
    pub fn record(&self, update: LoadProgress) {
        self.updates.lock().unwrap().push(update);
    }

    pub fn take(&self) -> Vec<LoadProgress> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }
}
