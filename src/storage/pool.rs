//! Bounded pool of SQLite connections
//!
//! SQLite connections are not `Sync`, so each crawl loop checks one out for
//! the duration of a storage operation and returns it on drop. The pool is
//! bounded; when every connection is in use, `acquire` waits instead of
//! opening more.

use crate::storage::{SqliteStore, StorageError, StorageResult};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

struct PoolInner {
    semaphore: Arc<Semaphore>,
    free: Mutex<Vec<SqliteStore>>,
}

/// Fixed-size pool of [`SqliteStore`] connections
#[derive(Clone)]
pub struct StorePool {
    inner: Arc<PoolInner>,
}

impl StorePool {
    /// Opens `size` connections against the database at `path`
    ///
    /// All connections are opened eagerly so configuration problems surface
    /// at startup rather than mid-crawl.
    pub fn open(path: &Path, size: usize) -> StorageResult<Self> {
        let mut free = Vec::with_capacity(size);
        for _ in 0..size {
            free.push(SqliteStore::open(path)?);
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(size)),
                free: Mutex::new(free),
            }),
        })
    }

    /// Checks out a connection, waiting if the pool is exhausted
    pub async fn acquire(&self) -> StorageResult<PooledStore> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;

        let store = self
            .inner
            .free
            .lock()
            .unwrap()
            .pop()
            .ok_or(StorageError::PoolClosed)?;

        Ok(PooledStore {
            store: Some(store),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }
}

/// A checked-out connection; returns to the pool on drop
pub struct PooledStore {
    store: Option<SqliteStore>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledStore {
    type Target = SqliteStore;

    fn deref(&self) -> &SqliteStore {
        self.store.as_ref().unwrap()
    }
}

impl DerefMut for PooledStore {
    fn deref_mut(&mut self) -> &mut SqliteStore {
        self.store.as_mut().unwrap()
    }
}

impl Drop for PooledStore {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.inner.free.lock().unwrap().push(store);
        }
    }
}
