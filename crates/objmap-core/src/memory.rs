//! In-memory clustered object store
//!
//! A process-local implementation of the [`ObjectStore`] adapter so the
//! engine can be exercised end-to-end without a cluster: named pools of
//! attribute-bearing objects, with batches executed atomically under a
//! cluster-wide lock. Linearizability of accepted batches falls out of the
//! locking — every batch observes and mutates the object inside one
//! critical section.
//!
//! Handles are cheap Arc-backed clones, so any number of map handles across
//! any number of threads can target the same backing object. Batch
//! execution runs on a worker thread per submission; `submit` itself only
//! verifies the pool still resolves (the scheduling step) and hands back
//! the completion handle.

use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::adapter::{Batch, BatchHandle, BatchResult, DataOp, ObjectStat, ObjectStore};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct MemObject {
    data: Vec<u8>,
    attrs: HashMap<String, Vec<u8>>,
    mtime: Option<SystemTime>,
}

type Pool = HashMap<String, MemObject>;
type Pools = HashMap<String, Pool>;

/// A process-local cluster of named pools.
#[derive(Clone, Default)]
pub struct MemCluster {
    pools: Arc<Mutex<Pools>>,
}

impl MemCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool if it does not already exist.
    pub fn create_pool(&self, name: &str) {
        self.pools
            .lock()
            .entry(name.to_string())
            .or_insert_with(Pool::new);
    }

    /// Remove a pool and everything in it. Returns false if it was absent.
    pub fn remove_pool(&self, name: &str) -> bool {
        self.pools.lock().remove(name).is_some()
    }

    /// Acquire an I/O context for the named pool.
    pub fn ioctx(&self, pool: &str) -> Result<MemIoCtx, StoreError> {
        let pools = self.pools.lock();
        if !pools.contains_key(pool) {
            return Err(StoreError::NoSuchPool {
                pool: pool.to_string(),
            });
        }
        Ok(MemIoCtx {
            pools: Arc::clone(&self.pools),
            pool: pool.to_string(),
        })
    }
}

/// An I/O context bound to one pool of a [`MemCluster`].
#[derive(Debug, Clone)]
pub struct MemIoCtx {
    pools: Arc<Mutex<Pools>>,
    pool: String,
}

impl MemIoCtx {
    fn with_pool<T>(
        &self,
        f: impl FnOnce(&mut Pool) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut pools = self.pools.lock();
        let pool = pools.get_mut(&self.pool).ok_or(StoreError::NoSuchPool {
            pool: self.pool.clone(),
        })?;
        f(pool)
    }
}

fn not_found(obj_id: &str) -> StoreError {
    StoreError::NotFound {
        obj_id: obj_id.to_string(),
    }
}

/// Execute a batch against one object. Caller holds the pool lock, so the
/// whole body is one atomic step of the object's history.
fn execute(obj: &mut MemObject, batch: &Batch) -> BatchResult {
    if let Some((attr, expected)) = &batch.compare {
        if obj.attrs.get(attr) != Some(expected) {
            return BatchResult::failed(StoreError::PredicateFailed { attr: attr.clone() });
        }
    }

    let mut attrs = HashMap::new();
    for name in &batch.get_attrs {
        if let Some(value) = obj.attrs.get(name) {
            attrs.insert(name.clone(), value.clone());
        }
    }

    let stat = batch.want_stat.then(|| ObjectStat {
        size: obj.data.len() as u64,
        mtime: obj.mtime.unwrap_or(SystemTime::UNIX_EPOCH),
    });

    let mut reads = Vec::new();
    let mut mutated = false;
    for op in &batch.data_ops {
        match op {
            DataOp::Append(bytes) => {
                obj.data.extend_from_slice(bytes);
                mutated = true;
            }
            DataOp::Read { offset, len } => {
                let start = (*offset as usize).min(obj.data.len());
                let end = if *len == u64::MAX {
                    obj.data.len()
                } else {
                    start.saturating_add(*len as usize).min(obj.data.len())
                };
                reads.push(obj.data[start..end].to_vec());
            }
            DataOp::Truncate(len) => {
                obj.data.resize(*len as usize, 0);
                mutated = true;
            }
            DataOp::WriteFull(bytes) => {
                obj.data = bytes.clone();
                mutated = true;
            }
        }
    }

    if let Some((attr, value)) = &batch.set_attr {
        obj.attrs.insert(attr.clone(), value.clone());
        mutated = true;
    }

    if mutated {
        obj.mtime = Some(SystemTime::now());
    }

    BatchResult {
        status: Ok(()),
        attrs,
        stat,
        reads,
    }
}

impl ObjectStore for MemIoCtx {
    fn stat(&self, obj_id: &str) -> Result<ObjectStat, StoreError> {
        self.with_pool(|pool| {
            let obj = pool.get(obj_id).ok_or_else(|| not_found(obj_id))?;
            Ok(ObjectStat {
                size: obj.data.len() as u64,
                mtime: obj.mtime.unwrap_or(SystemTime::UNIX_EPOCH),
            })
        })
    }

    fn create_exclusive(&self, obj_id: &str) -> Result<(), StoreError> {
        self.with_pool(|pool| {
            if pool.contains_key(obj_id) {
                return Err(StoreError::AlreadyExists {
                    obj_id: obj_id.to_string(),
                });
            }
            pool.insert(
                obj_id.to_string(),
                MemObject {
                    mtime: Some(SystemTime::now()),
                    ..MemObject::default()
                },
            );
            Ok(())
        })
    }

    fn delete(&self, obj_id: &str) -> Result<(), StoreError> {
        self.with_pool(|pool| {
            pool.remove(obj_id)
                .map(|_| ())
                .ok_or_else(|| not_found(obj_id))
        })
    }

    fn get_attrs(&self, obj_id: &str, names: &[&str]) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        self.with_pool(|pool| {
            let obj = pool.get(obj_id).ok_or_else(|| not_found(obj_id))?;
            let mut out = HashMap::new();
            for name in names {
                if let Some(value) = obj.attrs.get(*name) {
                    out.insert((*name).to_string(), value.clone());
                }
            }
            Ok(out)
        })
    }

    fn set_attrs(&self, obj_id: &str, attrs: &[(String, Vec<u8>)]) -> Result<(), StoreError> {
        self.with_pool(|pool| {
            let obj = pool.get_mut(obj_id).ok_or_else(|| not_found(obj_id))?;
            for (name, value) in attrs {
                obj.attrs.insert(name.clone(), value.clone());
            }
            obj.mtime = Some(SystemTime::now());
            Ok(())
        })
    }

    fn submit(&self, obj_id: &str, batch: Batch) -> Result<BatchHandle, StoreError> {
        // Scheduling step: the pool must still resolve, otherwise the batch
        // cannot be queued at all.
        self.with_pool(|_| Ok(()))?;

        let ctx = self.clone();
        let obj_id = obj_id.to_string();
        let worker = thread::spawn(move || {
            match ctx.with_pool(|pool| {
                let obj = pool.get_mut(&obj_id).ok_or_else(|| not_found(&obj_id))?;
                Ok(execute(obj, &batch))
            }) {
                Ok(result) => result,
                Err(e) => BatchResult::failed(e),
            }
        });

        Ok(BatchHandle::spawned(worker))
    }
}
