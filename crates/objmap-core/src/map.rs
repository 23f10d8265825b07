//! Replicated map engine — the heart of objmap.
//!
//! A [`ReplicatedMap`] pairs a local ordered cache with a single backing
//! object on a clustered store. The object's attribute set carries the
//! authoritative epoch; its data stream is the changelog. Every mutation is
//! an atomic compare-and-swap batch gated on the epoch, so mutations from
//! any number of handles in any number of processes serialize at the
//! object: exactly one wins each epoch transition, the rest observe the
//! predicate failure, catch up, and retry.
//!
//! **Read path**: cache only — `size`/`count`/`find`/iteration never touch
//! the store and CAN RETURN STALE RESULTS. A handle learns about remote
//! mutations only while performing its own, or through [`ReplicatedMap::sync`].
//! Callers wanting fresh reads must sync (or open a fresh handle) first.
//!
//! **Write path**: tentative local apply → epoch-gated batch (epoch bump +
//! one appended record) → commit local bookkeeping. A lost race rolls the
//! tentative change back, replays the unseen changelog tail, and retries.
//!
//! A single handle is not thread-safe; callers serialize access externally.
//! Public mutations are synchronous and block on at least one round trip.

use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::adapter::{Batch, ObjectStore};
use crate::cache::LocalCache;
use crate::codec::{self, TypeTag, Value};
use crate::config::MapConfig;
use crate::error::{MapError, MapResult, StoreError};
use crate::record::{self, Record};

/// Options for opening a replicated map.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Map name (first component of the object id)
    pub name: String,
    /// Application namespace within the map name
    pub cookie: String,
    /// Key domain; must be [`TypeTag::Text`]
    pub key_tag: TypeTag,
    /// Value domain
    pub value_tag: TypeTag,
    /// Keep the backing object when the last handle closes
    pub persist_on_drop: bool,
    /// Reserved for a weak-consistency single-writer mode; accepted and
    /// recorded, currently without behavior
    pub async_mode: bool,
}

impl OpenOptions {
    /// Options for a text→text map with defaults
    /// (`persist_on_drop = true`, `async_mode = false`).
    pub fn new(name: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cookie: cookie.into(),
            key_tag: TypeTag::Text,
            value_tag: TypeTag::Text,
            persist_on_drop: true,
            async_mode: false,
        }
    }

    /// Set the value domain.
    #[must_use]
    pub fn value_tag(mut self, tag: TypeTag) -> Self {
        self.value_tag = tag;
        self
    }

    /// Set whether the backing object survives close.
    #[must_use]
    pub fn persist_on_drop(mut self, persist: bool) -> Self {
        self.persist_on_drop = persist;
        self
    }

    /// Set the reserved async mode flag.
    #[must_use]
    pub fn async_mode(mut self, enabled: bool) -> Self {
        self.async_mode = enabled;
        self
    }

    /// The backing-object id this set of options addresses.
    #[must_use]
    pub fn object_id(&self) -> String {
        format!("/map/{}/{}", self.name, self.cookie)
    }
}

/// A durable key→value mapping replicated through one backing object.
#[derive(Debug)]
pub struct ReplicatedMap<S: ObjectStore> {
    store: S,
    obj_id: String,
    cache: LocalCache,
    epoch: u64,
    changelog_offset: u64,
    line_count: u64,
    value_tag: TypeTag,
    persist_on_drop: bool,
    async_mode: bool,
    config: MapConfig,
    closed: bool,
}

impl<S: ObjectStore> ReplicatedMap<S> {
    /// Open a map through the given I/O context with default configuration.
    ///
    /// Creates the backing object if it does not exist, otherwise replays
    /// its full changelog into the cache.
    pub fn open(store: S, opts: OpenOptions) -> MapResult<Self> {
        Self::open_with_config(store, opts, MapConfig::default())
    }

    /// Open with explicit configuration.
    pub fn open_with_config(store: S, opts: OpenOptions, config: MapConfig) -> MapResult<Self> {
        if !opts.key_tag.is_key_tag() {
            return Err(MapError::UnsupportedType {
                role: "key",
                tag: opts.key_tag,
            });
        }
        if !opts.value_tag.is_value_tag() {
            return Err(MapError::UnsupportedType {
                role: "value",
                tag: opts.value_tag,
            });
        }

        let obj_id = opts.object_id();
        let mut map = Self {
            store,
            obj_id,
            cache: LocalCache::new(),
            epoch: 0,
            changelog_offset: 0,
            line_count: 0,
            value_tag: opts.value_tag,
            persist_on_drop: opts.persist_on_drop,
            async_mode: opts.async_mode,
            config,
            closed: false,
        };

        match map.store.stat(&map.obj_id) {
            Err(StoreError::NotFound { .. }) => {
                map.store.create_exclusive(&map.obj_id)?;
                map.store.set_attrs(
                    &map.obj_id,
                    &[(map.config.epoch_attr.clone(), b"0".to_vec())],
                )?;
                debug!(obj = %map.obj_id, "created backing object");
            }
            Err(e) => return Err(e.into()),
            Ok(_) => map.initialize_map()?,
        }

        Ok(map)
    }

    /// Close the handle. If the map was opened with `persist_on_drop =
    /// false`, the backing object is deleted and a delete failure is
    /// surfaced. Dropping without closing performs the same delete
    /// best-effort.
    pub fn close(mut self) -> MapResult<()> {
        self.closed = true;
        if !self.persist_on_drop {
            self.store.delete(&self.obj_id)?;
        }
        Ok(())
    }

    /// Insert a key→value pair.
    ///
    /// Returns `Ok(true)` if the key was inserted, `Ok(false)` if it was
    /// already present (locally, or remotely after losing a race — the
    /// local insertion then becomes a no-op). On `Err` the tentative local
    /// change has been rolled back and the handle remains usable.
    pub fn insert(&mut self, key: &str, value: Value) -> MapResult<bool> {
        if value.tag() != self.value_tag {
            return Err(MapError::codec(format!(
                "value tag {:?} does not match the map's declared {:?}",
                value.tag(),
                self.value_tag
            )));
        }
        codec::validate_token("key", key)?;
        let value_text = value.to_text();
        codec::validate_token("value", &value_text)?;
        let rec = record::encode_insert(key, &value_text);

        let mut locally_inserted = self.cache.insert(key, value.clone());
        let mut conflicts = 0u32;

        loop {
            // The batch always asserts freshness; it mutates only when this
            // handle actually added the entry.
            let mut batch =
                Batch::new().compare_attr(self.config.epoch_attr.as_str(), encode_epoch(self.epoch));
            if locally_inserted {
                batch = batch
                    .set_attr(self.config.epoch_attr.as_str(), encode_epoch(self.epoch + 1))
                    .append(rec.clone().into_bytes());
            }

            let handle = match self.store.submit(&self.obj_id, batch) {
                Ok(h) => h,
                Err(e) => {
                    if locally_inserted {
                        self.cache.erase(key);
                    }
                    return Err(e.into());
                }
            };

            match handle.wait().status {
                Ok(()) => {
                    if locally_inserted {
                        self.commit_mutation(rec.len() as u64);
                    }
                    break;
                }
                Err(e) if e.is_predicate_failed() => {
                    debug!(obj = %self.obj_id, epoch = self.epoch, "insert lost the epoch race");
                    if locally_inserted {
                        self.cache.erase(key);
                    }
                    self.do_update()?;
                    locally_inserted = self.cache.insert(key, value.clone());
                    conflicts += 1;
                    self.backoff(conflicts);
                }
                Err(e) => {
                    if locally_inserted {
                        self.cache.erase(key);
                    }
                    return Err(e.into());
                }
            }
        }

        self.maybe_compact();
        Ok(locally_inserted)
    }

    /// Erase a key.
    ///
    /// Emits a changelog record even if the key is absent locally: a
    /// concurrent update may be about to bring it in, and an idempotent
    /// erase is cheap.
    pub fn erase(&mut self, key: &str) -> MapResult<()> {
        codec::validate_token("key", key)?;
        let rec = record::encode_erase(key);
        let mut conflicts = 0u32;

        loop {
            let batch = Batch::new()
                .compare_attr(self.config.epoch_attr.as_str(), encode_epoch(self.epoch))
                .set_attr(self.config.epoch_attr.as_str(), encode_epoch(self.epoch + 1))
                .append(rec.clone().into_bytes());

            let handle = self.store.submit(&self.obj_id, batch)?;
            match handle.wait().status {
                Ok(()) => {
                    self.commit_mutation(rec.len() as u64);
                    self.cache.erase(key);
                    break;
                }
                Err(e) if e.is_predicate_failed() => {
                    debug!(obj = %self.obj_id, epoch = self.epoch, "erase lost the epoch race");
                    self.do_update()?;
                    conflicts += 1;
                    self.backoff(conflicts);
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.maybe_compact();
        Ok(())
    }

    /// Replay any changelog records this handle has not seen yet.
    ///
    /// The explicit catch-up point for callers who need fresh reads: after
    /// `sync` returns, the cache reflects every mutation accepted up to the
    /// epoch observed during the call.
    pub fn sync(&mut self) -> MapResult<()> {
        self.do_update()
    }

    /// Number of entries in the local cache. May be stale.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.cache.len() as u64
    }

    /// Number of local occurrences of `key` (0 or 1). May be stale.
    #[must_use]
    pub fn count(&self, key: &str) -> u64 {
        self.cache.count(key)
    }

    /// Look up `key` in the local cache. May be stale.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&Value> {
        self.cache.get(key)
    }

    /// True if `key` is present in the local cache. May be stale.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains(key)
    }

    /// Forward iteration over the local cache in key order. May be stale.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cache.iter()
    }

    /// Epoch of the last successful round trip.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Bytes of changelog replayed into the cache.
    #[must_use]
    pub fn changelog_offset(&self) -> u64 {
        self.changelog_offset
    }

    /// Records replayed since the last observed compaction.
    #[must_use]
    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    /// The backing-object id.
    #[must_use]
    pub fn object_id(&self) -> &str {
        &self.obj_id
    }

    /// Whether the reserved async mode was requested at open.
    #[must_use]
    pub fn async_mode(&self) -> bool {
        self.async_mode
    }

    // ------------------------------------------------------------------
    // Protocol internals
    // ------------------------------------------------------------------

    /// Populate this handle from the remote's durable state, from scratch.
    fn initialize_map(&mut self) -> MapResult<()> {
        loop {
            // One atomic observation of (epoch, size).
            let handle = self.store.submit(
                &self.obj_id,
                Batch::new().get_attr(self.config.epoch_attr.as_str()).stat(),
            )?;
            let observed = handle.wait();
            observed.status.map_err(MapError::from)?;

            let epoch_buf = observed
                .attrs
                .get(&self.config.epoch_attr)
                .cloned()
                .ok_or_else(|| MapError::corrupt_state("epoch attribute missing"))?;
            let remote_epoch = parse_epoch(&epoch_buf)?;

            // Second batch: the full changelog, valid only if the epoch did
            // not move underneath us.
            let handle = self.store.submit(
                &self.obj_id,
                Batch::new()
                    .compare_attr(self.config.epoch_attr.as_str(), epoch_buf)
                    .read(0, u64::MAX),
            )?;
            let mut result = handle.wait();
            match result.status {
                Err(e) if e.is_predicate_failed() => {
                    debug!(obj = %self.obj_id, "epoch moved during initialization; rereading");
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok(()) => {
                    let bytes = result.reads.pop().unwrap_or_default();
                    self.cache.clear();
                    self.line_count = 0;
                    self.changelog_offset = bytes.len() as u64;
                    self.apply_changelog(&bytes, 0)?;
                    self.epoch = remote_epoch;
                    debug!(
                        obj = %self.obj_id,
                        epoch = self.epoch,
                        entries = self.cache.len(),
                        "initialized from remote state"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Reconcile with remote state after a detected divergence.
    fn do_update(&mut self) -> MapResult<()> {
        loop {
            let attrs = self
                .store
                .get_attrs(&self.obj_id, &[self.config.epoch_attr.as_str()])?;
            let epoch_buf = attrs
                .get(&self.config.epoch_attr)
                .cloned()
                .ok_or_else(|| MapError::corrupt_state("epoch attribute missing"))?;
            let remote_epoch = parse_epoch(&epoch_buf)?;

            if remote_epoch == self.epoch {
                return Ok(());
            }

            if remote_epoch < self.epoch {
                // A peer compacted the object out from under us. The cached
                // replay position means nothing anymore; rebuild from zero.
                info!(
                    obj = %self.obj_id,
                    local = self.epoch,
                    remote = remote_epoch,
                    "epoch regressed; assuming peer compaction and reinitializing"
                );
                self.cache.clear();
                return self.initialize_map();
            }

            // Remote is ahead: fetch the unseen tail in the same atomic
            // observation as the epoch assertion.
            let handle = self.store.submit(
                &self.obj_id,
                Batch::new()
                    .compare_attr(self.config.epoch_attr.as_str(), epoch_buf)
                    .read(self.changelog_offset, u64::MAX),
            )?;
            let mut result = handle.wait();
            match result.status {
                Err(e) if e.is_predicate_failed() => {
                    debug!(obj = %self.obj_id, "epoch moved during catch-up; rereading");
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok(()) => {
                    let bytes = result.reads.pop().unwrap_or_default();
                    self.apply_changelog(&bytes, self.changelog_offset)?;
                    self.changelog_offset += bytes.len() as u64;
                    self.epoch = remote_epoch;
                    return Ok(());
                }
            }
        }
    }

    /// Replay decoded records into the cache. `base` is the absolute
    /// changelog position of `bytes[0]`, for error reporting.
    fn apply_changelog(&mut self, bytes: &[u8], base: u64) -> MapResult<()> {
        for (offset, rec) in record::decode(bytes, base)? {
            match rec {
                Record::Insert { key, value } => {
                    let value = Value::from_text(&value, self.value_tag).map_err(|e| {
                        MapError::CorruptLog {
                            offset,
                            reason: e.to_string(),
                        }
                    })?;
                    // Changelog replay is authoritative: overwrite, never skip.
                    self.cache.replace(&key, value);
                    self.line_count += 1;
                }
                Record::Erase { key } => {
                    self.cache.erase(&key);
                    self.line_count += 1;
                }
                Record::Unknown { tag } => {
                    warn!(obj = %self.obj_id, %tag, offset, "unknown changelog record tag; skipping");
                }
            }
        }
        Ok(())
    }

    /// Advance the bookkeeping for one accepted mutation batch.
    fn commit_mutation(&mut self, record_len: u64) {
        self.epoch += 1;
        self.line_count += 1;
        self.changelog_offset += record_len;
    }

    /// True once the changelog holds roughly five times as many records as
    /// there are live entries. An empty cache never triggers: rewriting an
    /// empty snapshot would erase the record of the erases themselves.
    fn needs_compaction(&self) -> bool {
        self.line_count > 0
            && !self.cache.is_empty()
            && (self.cache.len() as f64 / self.line_count as f64)
                <= self.config.compaction_trigger_ratio
    }

    /// Compact if the changelog has grown stale-heavy. Compaction failures
    /// are logged and swallowed — the changelog stays valid either way.
    fn maybe_compact(&mut self) {
        if self.needs_compaction() {
            if let Err(e) = self.do_compaction() {
                warn!(obj = %self.obj_id, error = %e, "compaction failed; continuing");
            }
        }
    }

    /// Rewrite the changelog as a snapshot of the live cache and reset the
    /// epoch to zero.
    fn do_compaction(&mut self) -> MapResult<()> {
        let mut conflicts = 0u32;
        loop {
            // Compaction must act on a snapshot we understand.
            self.do_update()?;

            let mut snap = String::new();
            for (key, value) in self.cache.iter() {
                snap.push_str(&record::encode_insert(key, &value.to_text()));
            }

            let handle = self.store.submit(
                &self.obj_id,
                Batch::new()
                    .compare_attr(self.config.epoch_attr.as_str(), encode_epoch(self.epoch))
                    .truncate(0)
                    .write_full(snap.clone().into_bytes())
                    .set_attr(self.config.epoch_attr.as_str(), b"0".to_vec()),
            )?;
            match handle.wait().status {
                Ok(()) => {
                    self.epoch = 0;
                    self.line_count = self.cache.len() as u64;
                    self.changelog_offset = snap.len() as u64;
                    debug!(
                        obj = %self.obj_id,
                        entries = self.cache.len(),
                        bytes = self.changelog_offset,
                        "compacted changelog"
                    );
                    return Ok(());
                }
                Err(e) if e.is_predicate_failed() => {
                    conflicts += 1;
                    self.backoff(conflicts);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Jittered exponential backoff between compare-and-swap conflicts.
    /// Not required for correctness, only for manners under contention.
    fn backoff(&self, conflicts: u32) {
        let base = self.config.backoff_base.as_micros() as u64;
        let cap = self.config.backoff_max.as_micros() as u64;
        let ceiling = base
            .saturating_mul(1u64 << conflicts.min(16))
            .min(cap.max(1));
        let delay = rand::thread_rng().gen_range(0..=ceiling);
        if delay > 0 {
            thread::sleep(Duration::from_micros(delay));
        }
    }
}

impl<S: ObjectStore> Drop for ReplicatedMap<S> {
    fn drop(&mut self) {
        if !self.closed && !self.persist_on_drop {
            if let Err(e) = self.store.delete(&self.obj_id) {
                warn!(obj = %self.obj_id, error = %e, "failed to delete backing object on drop");
            }
        }
    }
}

fn encode_epoch(epoch: u64) -> Vec<u8> {
    epoch.to_string().into_bytes()
}

fn parse_epoch(buf: &[u8]) -> MapResult<u64> {
    std::str::from_utf8(buf)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| MapError::corrupt_state(format!("malformed epoch attribute: {:?}", buf)))
}
