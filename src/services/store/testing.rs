//! Instrumented store used by unit tests: counts listing calls, injects
//! listing and delete failures, and can hold listings until a gate is opened.

use super::{
    ByteStream, ListObjectsParams, ListPage, MemoryStore, ObjectStore, StoreError, StoreResult,
};
use crate::models::{bucket::Bucket, object::ObjectEntry};
use async_trait::async_trait;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::watch;

pub struct InstrumentedStore {
    pub inner: MemoryStore,
    list_calls: AtomicUsize,
    full_scans: AtomicUsize,
    /// Number of upcoming listing calls that fail with `Unavailable`.
    transient_failures: AtomicUsize,
    /// Listing calls with an index at or above this value always fail.
    fail_from_call: AtomicUsize,
    /// Object deletes still allowed to succeed; the rest fail.
    delete_budget: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl InstrumentedStore {
    pub fn new(inner: MemoryStore) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            full_scans: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            fail_from_call: AtomicUsize::new(usize::MAX),
            delete_budget: AtomicUsize::new(usize::MAX),
            gate,
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Flat listings that start from the beginning of the bucket.
    pub fn full_scans(&self) -> usize {
        self.full_scans.load(Ordering::SeqCst)
    }

    pub fn fail_next_lists(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_lists_from_call(&self, call_index: usize) {
        self.fail_from_call.store(call_index, Ordering::SeqCst);
    }

    pub fn fail_deletes_after(&self, successes: usize) {
        self.delete_budget.store(successes, Ordering::SeqCst);
    }

    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub async fn wait_for_list_calls(&self, count: usize) {
        while self.list_calls() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn create_bucket(&self, name: &str, owner: &str) -> StoreResult<Bucket> {
        self.inner.create_bucket(name, owner).await
    }

    async fn head_bucket(&self, name: &str) -> StoreResult<Bucket> {
        self.inner.head_bucket(name).await
    }

    async fn list_buckets(&self) -> StoreResult<Vec<Bucket>> {
        self.inner.list_buckets().await
    }

    async fn delete_bucket(&self, name: &str, force: bool) -> StoreResult<()> {
        self.inner.delete_bucket(name, force).await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        body: ByteStream,
    ) -> StoreResult<ObjectEntry> {
        self.inner.put_object(bucket, key, content_type, body).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<(ObjectEntry, ByteStream)> {
        self.inner.get_object(bucket, key).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectEntry> {
        self.inner.head_object(bucket, key).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let allowed = self
            .delete_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(StoreError::Unavailable(format!("injected failure deleting `{key}`")));
        }
        self.inner.delete_object(bucket, key).await
    }

    async fn list_objects(&self, bucket: &str, params: &ListObjectsParams) -> StoreResult<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if params.delimiter.is_none() && params.continuation_token.is_none() {
            self.full_scans.fetch_add(1, Ordering::SeqCst);
        }

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(StoreError::Unavailable("gate dropped".into()));
        }

        if call >= self.fail_from_call.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected failure on call {call}")));
        }
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected transient failure".into()));
        }

        self.inner.list_objects(bucket, params).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}
