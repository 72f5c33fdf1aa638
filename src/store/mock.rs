use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};

use crate::errors::RecorderError;
use crate::store::BlobStore;

#[derive(Default)]
pub struct MockStore {
    map: RwLock<HashMap<String, Bytes>>,
    broken: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MockStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&self, key: impl Into<String>, raw: impl Into<Bytes>) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.into(), raw.into());
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Makes downloads of `key` fail while everything else keeps working.
    pub fn break_key(&self, key: impl Into<String>) {
        let mut broken = self.broken.write().unwrap_or_else(|e| e.into_inner());
        broken.insert(key.into());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RecorderError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RecorderError::RemoteUnavailable)
        } else {
            Ok(())
        }
    }
}

impl BlobStore for MockStore {
    fn upload(
        &self,
        key: &str,
        _content_type: String,
        raw: Bytes,
    ) -> BoxFuture<Result<(), RecorderError>> {
        let key = key.to_owned();

        async move {
            self.check()?;
            self.insert(key, raw);
            Ok(())
        }
        .boxed()
    }

    fn download(&self, key: &str) -> BoxFuture<Result<Bytes, RecorderError>> {
        let key = key.to_owned();

        async move {
            self.check()?;

            let broken = self
                .broken
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&key);

            if broken {
                return Err(RecorderError::RemoteUnavailable);
            }

            self.get(&key).ok_or(RecorderError::BlobNotFound { key })
        }
        .boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<Result<(), RecorderError>> {
        let key = key.to_owned();

        async move {
            self.check()?;

            let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
            map.remove(&key);
            Ok(())
        }
        .boxed()
    }
}
