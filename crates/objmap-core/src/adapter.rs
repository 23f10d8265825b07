//! Object-store adapter — the seam between the engine and the backing store
//!
//! The engine needs exactly four capabilities from the store: object stat,
//! keyed attributes with compare assertions, bytewise data-stream access,
//! and the ability to bundle any subset of those into a single atomic batch
//! gated by an equality predicate over one attribute. [`ObjectStore`] is
//! that contract and nothing more.
//!
//! Batch execution is asynchronous: [`ObjectStore::submit`] schedules the
//! batch and hands back a [`BatchHandle`]; [`BatchHandle::wait`] blocks for
//! the [`BatchResult`]. A `submit` error means the batch could not even be
//! scheduled and nothing was executed.
//!
//! The store must guarantee linearizability of accepted batches on the same
//! object. Everything above this trait is built on that assumption.

use std::thread::JoinHandle;
use std::time::SystemTime;

use hashbrown::HashMap;

use crate::error::StoreError;

/// Object metadata returned by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    /// Data-stream length in bytes
    pub size: u64,
    /// Last mutation time
    pub mtime: SystemTime,
}

/// A data-stream operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOp {
    /// Append bytes to the end of the data stream
    Append(Vec<u8>),
    /// Read `len` bytes starting at `offset`, clamped to the stream end.
    /// `len == u64::MAX` reads to the end of the stream.
    Read {
        /// Starting byte offset
        offset: u64,
        /// Byte count, clamped to the stream end
        len: u64,
    },
    /// Truncate (or zero-extend) the data stream to exactly `len` bytes
    Truncate(u64),
    /// Replace the entire data stream
    WriteFull(Vec<u8>),
}

/// An atomic batch of operations against one object.
///
/// Composes zero or one equality predicate over a named attribute, zero or
/// one attribute write, read-side captures (attribute values, stat), and any
/// number of data-stream operations. On predicate failure none of the other
/// operations take effect.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub(crate) compare: Option<(String, Vec<u8>)>,
    pub(crate) set_attr: Option<(String, Vec<u8>)>,
    pub(crate) get_attrs: Vec<String>,
    pub(crate) want_stat: bool,
    pub(crate) data_ops: Vec<DataOp>,
}

impl Batch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate the whole batch on `attr` currently equaling `expected`.
    #[must_use]
    pub fn compare_attr(mut self, attr: impl Into<String>, expected: Vec<u8>) -> Self {
        self.compare = Some((attr.into(), expected));
        self
    }

    /// Set `attr` to `value` if the batch is accepted.
    #[must_use]
    pub fn set_attr(mut self, attr: impl Into<String>, value: Vec<u8>) -> Self {
        self.set_attr = Some((attr.into(), value));
        self
    }

    /// Capture the current value of `attr` in the result.
    #[must_use]
    pub fn get_attr(mut self, attr: impl Into<String>) -> Self {
        self.get_attrs.push(attr.into());
        self
    }

    /// Capture the object's stat in the result.
    #[must_use]
    pub fn stat(mut self) -> Self {
        self.want_stat = true;
        self
    }

    /// Append bytes to the data stream.
    #[must_use]
    pub fn append(mut self, bytes: Vec<u8>) -> Self {
        self.data_ops.push(DataOp::Append(bytes));
        self
    }

    /// Read a byte range; the buffer lands in [`BatchResult::reads`] in op
    /// order. `len == u64::MAX` reads to the end of the stream.
    #[must_use]
    pub fn read(mut self, offset: u64, len: u64) -> Self {
        self.data_ops.push(DataOp::Read { offset, len });
        self
    }

    /// Truncate the data stream to `len` bytes.
    #[must_use]
    pub fn truncate(mut self, len: u64) -> Self {
        self.data_ops.push(DataOp::Truncate(len));
        self
    }

    /// Replace the entire data stream.
    #[must_use]
    pub fn write_full(mut self, bytes: Vec<u8>) -> Self {
        self.data_ops.push(DataOp::WriteFull(bytes));
        self
    }
}

/// Completion of an executed batch.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Per-batch return code. `Err(StoreError::PredicateFailed { .. })` is
    /// the distinguished compare-and-swap mismatch.
    pub status: Result<(), StoreError>,
    /// Captured attribute values, keyed by attribute name. Attributes that
    /// do not exist on the object are simply absent.
    pub attrs: HashMap<String, Vec<u8>>,
    /// Captured stat, if the batch asked for one
    pub stat: Option<ObjectStat>,
    /// Read buffers, one per `read` op, in op order
    pub reads: Vec<Vec<u8>>,
}

impl BatchResult {
    /// A failed result carrying no captures.
    #[must_use]
    pub fn failed(err: StoreError) -> Self {
        Self {
            status: Err(err),
            attrs: HashMap::new(),
            stat: None,
            reads: Vec::new(),
        }
    }

    /// True for the distinguished compare-and-swap mismatch.
    #[must_use]
    pub fn predicate_failed(&self) -> bool {
        matches!(&self.status, Err(e) if e.is_predicate_failed())
    }
}

enum HandleInner {
    Ready(BatchResult),
    Spawned(JoinHandle<BatchResult>),
}

/// Handle to an in-flight batch. Await the result with [`BatchHandle::wait`].
pub struct BatchHandle {
    inner: HandleInner,
}

impl BatchHandle {
    /// Wrap an already-completed result.
    #[must_use]
    pub fn ready(result: BatchResult) -> Self {
        Self {
            inner: HandleInner::Ready(result),
        }
    }

    /// Wrap a worker thread computing the result.
    #[must_use]
    pub fn spawned(handle: JoinHandle<BatchResult>) -> Self {
        Self {
            inner: HandleInner::Spawned(handle),
        }
    }

    /// Block until the batch completes and return its result.
    #[must_use]
    pub fn wait(self) -> BatchResult {
        match self.inner {
            HandleInner::Ready(result) => result,
            HandleInner::Spawned(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => BatchResult::failed(StoreError::backend("batch worker panicked")),
            },
        }
    }
}

/// The store capabilities the engine consumes. Implementations must make
/// accepted batches on the same object linearizable.
pub trait ObjectStore {
    /// Object size and mtime, or `NotFound`.
    fn stat(&self, obj_id: &str) -> Result<ObjectStat, StoreError>;

    /// Create an empty object; fails with `AlreadyExists` if one is present.
    fn create_exclusive(&self, obj_id: &str) -> Result<(), StoreError>;

    /// Remove the object.
    fn delete(&self, obj_id: &str) -> Result<(), StoreError>;

    /// Fetch the named attributes. Missing attributes are absent from the
    /// returned map, not errors.
    fn get_attrs(&self, obj_id: &str, names: &[&str]) -> Result<HashMap<String, Vec<u8>>, StoreError>;

    /// Set the given attributes.
    fn set_attrs(&self, obj_id: &str, attrs: &[(String, Vec<u8>)]) -> Result<(), StoreError>;

    /// Schedule `batch` for atomic execution against `obj_id`. An `Err`
    /// means the batch could not be scheduled and had no effect.
    fn submit(&self, obj_id: &str, batch: Batch) -> Result<BatchHandle, StoreError>;
}
