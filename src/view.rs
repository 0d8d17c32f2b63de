//! Typed Cache Views
//!
//! A [`CacheView`] is the per-operation handle callers read and write through.
//! It binds one [`OperationKey`] to a generator function, a resolved lifetime
//! and a reference to a shared [`BackingMap`].
//!
//! # Specializations
//!
//! Views are generic over a [`ValueSlot`] that decides how values are stored:
//!
//! | Alias | Slot | Value |
//! |-------|------|-------|
//! | [`IntCacheView<K>`] | [`IntSlot`] | `i32` (also `bool`, `i16`, `i8`) |
//! | [`LongCacheView<K>`] | [`LongSlot`] | `i64` |
//! | [`DoubleCacheView<K>`] | [`DoubleSlot`] | `f64` (also `f32`) |
//! | [`ObjectCacheView<K, V>`] | [`ObjectSlot<V>`] | any `Clone + Send + Sync` |
//!
//! Primitive values are stored unboxed in the entry's [`Payload`].
//!
//! # Read Path
//!
//! ```text
//!  value(key)
//!     │
//!     ▼
//!  backing.get ──▶ Fresh ─────────────▶ hit (touch under Accessed)
//!     │            Stale + Eager ─────▶ hit, refresh in background
//!     │            Stale / Dirty ──┐
//!     ▼ absent                     │
//!  single-flight claim ◀───────────┘
//!     ├─ producer: run generator, store entry, publish outcome
//!     └─ waiter:   block until the producer publishes
//! ```
//!
//! The lifetime and backing references are read through `parking_lot` locks
//! that are only ever held for a copy, so reconfiguration is seen by the next
//! read without a registry-wide lock on the hot path.

use crate::backing::BackingMap;
use crate::error::{BoxError, CacheError};
use crate::expiration::{Expiration, Payload, Staleness, ValueKind};
use crate::flight::{Claim, Outcome, ProducerSlot};
use crate::key::{CacheKey, Scope, StoredKey};
use crate::lifetime::{Expires, Lifetime, Refresh, ResolvedLifetime};
use crate::metrics::{CacheMetrics, ViewMetrics};
use crate::operation::OperationKey;
use crate::registry::Runtime;
use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Storage strategy for one value kind.
pub trait ValueSlot: Send + Sync + 'static {
    /// Value type handed to and returned from the view.
    type Value: Clone + Send + Sync + 'static;

    /// The payload variant this slot stores.
    const KIND: ValueKind;

    /// Wraps a value for storage.
    fn into_payload(value: Self::Value) -> Payload;

    /// Unwraps a stored value; `None` if the payload has another kind.
    fn from_payload(payload: &Payload) -> Option<Self::Value>;
}

/// Stores `i32` values unboxed.
#[derive(Debug)]
pub struct IntSlot;

impl ValueSlot for IntSlot {
    type Value = i32;
    const KIND: ValueKind = ValueKind::Int;

    fn into_payload(value: i32) -> Payload {
        Payload::Int(value)
    }

    fn from_payload(payload: &Payload) -> Option<i32> {
        match payload {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// Stores `i64` values unboxed.
#[derive(Debug)]
pub struct LongSlot;

impl ValueSlot for LongSlot {
    type Value = i64;
    const KIND: ValueKind = ValueKind::Long;

    fn into_payload(value: i64) -> Payload {
        Payload::Long(value)
    }

    fn from_payload(payload: &Payload) -> Option<i64> {
        match payload {
            Payload::Long(v) => Some(*v),
            _ => None,
        }
    }
}

/// Stores `f64` values unboxed.
#[derive(Debug)]
pub struct DoubleSlot;

impl ValueSlot for DoubleSlot {
    type Value = f64;
    const KIND: ValueKind = ValueKind::Double;

    fn into_payload(value: f64) -> Payload {
        Payload::Double(value)
    }

    fn from_payload(payload: &Payload) -> Option<f64> {
        match payload {
            Payload::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// Stores values of type `V` behind an `Arc`.
///
/// Wrap large values in an `Arc` yourself (`ObjectSlot<Arc<T>>`) to make the
/// clone returned on every hit cheap.
pub struct ObjectSlot<V>(PhantomData<fn() -> V>);

impl<V> fmt::Debug for ObjectSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObjectSlot")
    }
}

impl<V: Clone + Send + Sync + 'static> ValueSlot for ObjectSlot<V> {
    type Value = V;
    const KIND: ValueKind = ValueKind::Object;

    fn into_payload(value: V) -> Payload {
        Payload::Object(Arc::new(value))
    }

    fn from_payload(payload: &Payload) -> Option<V> {
        match payload {
            Payload::Object(any) => any.downcast_ref::<V>().cloned(),
            _ => None,
        }
    }
}

/// View storing `i32` values.
pub type IntCacheView<K> = CacheView<K, IntSlot>;
/// View storing `i64` values.
pub type LongCacheView<K> = CacheView<K, LongSlot>;
/// View storing `f64` values.
pub type DoubleCacheView<K> = CacheView<K, DoubleSlot>;
/// View storing arbitrary `V` values.
pub type ObjectCacheView<K, V> = CacheView<K, ObjectSlot<V>>;

type Generator<K, V> = Box<dyn Fn(&K) -> Result<V, BoxError> + Send + Sync>;

/// Key-level operations shared by every view specialization.
pub trait KeyView<K: CacheKey> {
    /// Returns `true` if an entry for `key` is present, stale or not.
    fn contains(&self, key: &K) -> bool;

    /// Removes the entry for `key`, returning whether one was present.
    fn remove(&self, key: &K) -> bool;

    /// Marks the entry for `key` dirty so the next read regenerates it.
    ///
    /// Under [`Refresh::Eager`] a background regeneration is submitted
    /// immediately. Does nothing if `key` is absent.
    fn dirty(&self, key: &K);

    /// Snapshot of this view's keys, taken when called.
    ///
    /// Entries added or removed afterwards are not reflected.
    fn keys(&self) -> Keys<K>;

    /// Number of entries this view owns in its backing map.
    fn size(&self) -> usize;

    /// Removes every entry this view owns, regardless of staleness.
    fn clear(&self);

    /// The view's current policy.
    fn lifetime(&self) -> ResolvedLifetime;

    /// Merges `overrides` into the view's policy.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Policy`] if the merged policy is invalid; the
    /// current policy is left unchanged.
    fn set_lifetime(&self, overrides: Lifetime) -> Result<(), CacheError>;
}

/// Snapshot iterator over a view's keys.
#[derive(Debug)]
pub struct Keys<K> {
    inner: std::vec::IntoIter<K>,
}

impl<K> Iterator for Keys<K> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K> ExactSizeIterator for Keys<K> {}

/// A typed, per-operation cache handle.
///
/// Obtained from [`CacheRegistry::view`](crate::CacheRegistry::view) or one
/// of its typed shortcuts. The same operation always yields the same view.
pub struct CacheView<K, S: ValueSlot> {
    operation: OperationKey,
    scope: Scope,
    backing: RwLock<Arc<BackingMap>>,
    lifetime: RwLock<ResolvedLifetime>,
    generator: Generator<K, S::Value>,
    runtime: Arc<Runtime>,
    metrics: ViewMetrics,
    me: Weak<Self>,
}

impl<K: CacheKey, S: ValueSlot> CacheView<K, S> {
    pub(crate) fn new<F, E>(
        operation: OperationKey,
        scope: Scope,
        backing: Arc<BackingMap>,
        lifetime: ResolvedLifetime,
        generator: F,
        runtime: Arc<Runtime>,
    ) -> Arc<Self>
    where
        F: Fn(&K) -> Result<S::Value, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Arc::new_cyclic(|me| Self {
            operation,
            scope,
            backing: RwLock::new(backing),
            lifetime: RwLock::new(lifetime),
            generator: Box::new(move |key| generator(key).map_err(Into::into)),
            runtime,
            metrics: ViewMetrics::default(),
            me: me.clone(),
        })
    }

    /// The operation this view caches.
    pub fn operation(&self) -> &OperationKey {
        &self.operation
    }

    /// The backing map currently holding this view's entries.
    pub fn backing(&self) -> Arc<BackingMap> {
        Arc::clone(&self.backing.read())
    }

    /// This view's counters.
    pub fn view_metrics(&self) -> &ViewMetrics {
        &self.metrics
    }

    /// Returns the cached value for `key`, generating it on a miss.
    ///
    /// Concurrent misses on the same key share one generator call.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Generation`] if the generator failed, either in
    /// this call or in the generation this call joined, and
    /// [`CacheError::GeneratorPanicked`] if that generator panicked on
    /// another thread.
    pub fn value(&self, key: &K) -> Result<S::Value, CacheError> {
        let lifetime = *self.lifetime.read();
        let now = self.runtime.clock.now();

        if let Some(entry) = self.backing().get(self.scope, key) {
            match entry.staleness(&lifetime, now) {
                Staleness::Fresh => {
                    if lifetime.expires() == Expires::Accessed {
                        entry.touch(now);
                    }
                    if let Some(value) = S::from_payload(entry.value()) {
                        self.metrics.record_hit();
                        return Ok(value);
                    }
                }
                Staleness::Stale if lifetime.refresh() == Refresh::Eager => {
                    if let Some(value) = S::from_payload(entry.value()) {
                        self.metrics.record_hit();
                        self.refresh_in_background(StoredKey::canonical(self.scope, key));
                        return Ok(value);
                    }
                }
                Staleness::Stale | Staleness::Dirty => {}
            }
        }

        self.metrics.record_miss();
        self.generate(key)
    }

    /// Returns the stored value for `key` without generating.
    ///
    /// Stale and dirty entries are returned as they are.
    pub fn get(&self, key: &K) -> Option<S::Value> {
        self.backing()
            .get(self.scope, key)
            .and_then(|entry| S::from_payload(entry.value()))
    }

    /// Stores `value` for `key` without calling the generator.
    ///
    /// A generation already in flight for `key` overwrites this value when it
    /// completes.
    pub fn put(&self, key: &K, value: S::Value) {
        let entry = Expiration::new(S::into_payload(value), self.runtime.clock.now());
        self.backing()
            .insert(StoredKey::canonical(self.scope, key), Arc::new(entry));
    }

    /// Snapshot of this view's stored values, taken when called.
    pub fn values(&self) -> impl Iterator<Item = S::Value> {
        self.backing()
            .snapshot_scope(self.scope)
            .into_iter()
            .filter_map(|(_, entry)| S::from_payload(entry.value()))
    }

    /// The raw entry for `key`, for inspecting timestamps.
    pub fn expiration(&self, key: &K) -> Option<Arc<Expiration>> {
        self.backing().get(self.scope, key)
    }

    fn generate(&self, key: &K) -> Result<S::Value, CacheError> {
        let stored = StoredKey::canonical(self.scope, key);
        let outcome = match self.runtime.flights.claim(stored, &self.operation) {
            Claim::Producer(slot) => match self.fresh_entry(key) {
                // Another producer finished between our lookup and our claim.
                Some(entry) => slot.complete(Ok(entry)),
                None => {
                    trace!(operation = %self.operation, ?key, "producing");
                    self.produce(slot, key)
                }
            },
            Claim::Waiter(pending) => {
                trace!(operation = %self.operation, ?key, "joining in-flight generation");
                self.metrics.record_wait();
                pending.wait()
            }
        };

        let entry = outcome?;
        S::from_payload(entry.value()).ok_or_else(|| CacheError::Configuration {
            operation: self.operation.clone(),
            reason: format!(
                "stored {} value read as {}",
                entry.value().kind().name(),
                S::KIND.name()
            ),
        })
    }

    fn fresh_entry(&self, key: &K) -> Option<Arc<Expiration>> {
        let lifetime = *self.lifetime.read();
        self.backing()
            .get(self.scope, key)
            .filter(|entry| entry.staleness(&lifetime, self.runtime.clock.now()) == Staleness::Fresh)
    }

    /// Runs the generator and stores its result before releasing waiters.
    fn produce(&self, slot: ProducerSlot<'_>, key: &K) -> Outcome {
        let result = (self.generator)(key);
        self.metrics.record_generation(result.is_ok());

        let outcome = match result {
            Ok(value) => {
                let entry = Arc::new(Expiration::new(
                    S::into_payload(value),
                    self.runtime.clock.now(),
                ));
                self.backing()
                    .insert(slot.key().clone(), Arc::clone(&entry));
                Ok(entry)
            }
            Err(source) => Err(CacheError::generation(&self.operation, source)),
        };
        slot.complete(outcome)
    }

    /// Submits a regeneration of `key` to the worker pool unless one is
    /// already running. Returns whether a job was submitted.
    fn refresh_in_background(&self, key: StoredKey) -> bool {
        if self.runtime.flights.is_pending(&key) {
            return false;
        }
        let Some(view) = self.me.upgrade() else {
            return false;
        };
        self.metrics.record_refresh();
        self.runtime.pool.execute(move || view.refresh_now(&key));
        true
    }

    fn refresh_now(&self, key: &StoredKey) {
        let Some(search) = key.downcast::<K>() else {
            return;
        };
        // Someone else already regenerating is as good as doing it here.
        if let Claim::Producer(slot) = self.runtime.flights.claim(key.clone(), &self.operation) {
            if let Err(e) = self.produce(slot, search) {
                warn!(operation = %self.operation, key = ?search, error = %e, "background refresh failed");
            }
        }
    }
}

impl<K: CacheKey> CacheView<K, IntSlot> {
    /// [`value`](Self::value) read as a `bool` (non-zero is `true`).
    pub fn value_bool(&self, key: &K) -> Result<bool, CacheError> {
        self.value(key).map(|v| v != 0)
    }

    /// [`value`](Self::value) narrowed to `i16`; out-of-range values wrap.
    #[allow(clippy::cast_possible_truncation)]
    pub fn value_i16(&self, key: &K) -> Result<i16, CacheError> {
        self.value(key).map(|v| v as i16)
    }

    /// [`value`](Self::value) narrowed to `i8`; out-of-range values wrap.
    #[allow(clippy::cast_possible_truncation)]
    pub fn value_i8(&self, key: &K) -> Result<i8, CacheError> {
        self.value(key).map(|v| v as i8)
    }

    /// [`get`](Self::get) read as a `bool`.
    pub fn get_bool(&self, key: &K) -> Option<bool> {
        self.get(key).map(|v| v != 0)
    }

    /// Stores a `bool` as `1` or `0`.
    pub fn put_bool(&self, key: &K, value: bool) {
        self.put(key, i32::from(value));
    }
}

impl<K: CacheKey> CacheView<K, DoubleSlot> {
    /// [`value`](Self::value) narrowed to `f32`, rounding to nearest.
    #[allow(clippy::cast_possible_truncation)]
    pub fn value_f32(&self, key: &K) -> Result<f32, CacheError> {
        self.value(key).map(|v| v as f32)
    }

    /// Stores an `f32` widened to `f64`.
    pub fn put_f32(&self, key: &K, value: f32) {
        self.put(key, f64::from(value));
    }
}

impl<K: CacheKey, S: ValueSlot> KeyView<K> for CacheView<K, S> {
    fn contains(&self, key: &K) -> bool {
        self.backing().contains(self.scope, key)
    }

    fn remove(&self, key: &K) -> bool {
        self.backing().remove(self.scope, key).is_some()
    }

    fn dirty(&self, key: &K) {
        let Some(entry) = self.backing().get(self.scope, key) else {
            return;
        };
        entry.mark_dirty();
        if self.lifetime.read().refresh() == Refresh::Eager {
            self.refresh_in_background(StoredKey::canonical(self.scope, key));
        }
    }

    fn keys(&self) -> Keys<K> {
        let keys: Vec<K> = self
            .backing()
            .snapshot_scope(self.scope)
            .iter()
            .filter_map(|(key, _)| key.downcast::<K>().cloned())
            .collect();
        Keys {
            inner: keys.into_iter(),
        }
    }

    fn size(&self) -> usize {
        self.backing().count_scope(self.scope)
    }

    fn clear(&self) {
        self.backing().drain_scope(self.scope);
    }

    fn lifetime(&self) -> ResolvedLifetime {
        *self.lifetime.read()
    }

    fn set_lifetime(&self, overrides: Lifetime) -> Result<(), CacheError> {
        ErasedView::merge_lifetime(self, overrides).map(|_| ())
    }
}

impl<K: CacheKey, S: ValueSlot> CacheMetrics for CacheView<K, S> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.to_btreemap();
        metrics.insert("entries".to_string(), self.size() as f64);
        metrics
    }

    fn view_kind(&self) -> &'static str {
        S::KIND.name()
    }
}

impl<K, S: ValueSlot> fmt::Debug for CacheView<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheView")
            .field("operation", &self.operation)
            .field("kind", &S::KIND)
            .field("key_type", &core::any::type_name::<K>())
            .field("lifetime", &*self.lifetime.read())
            .finish()
    }
}

/// Type-erased face of a view, used by the registry and the sweeper.
pub(crate) trait ErasedView: Send + Sync {
    fn operation(&self) -> &OperationKey;
    fn scope(&self) -> Scope;
    fn key_type(&self) -> &'static str;
    fn kind(&self) -> ValueKind;
    fn backing_map(&self) -> Arc<BackingMap>;

    /// Points the view at `backing`, returning the previous map.
    fn swap_backing(&self, backing: Arc<BackingMap>) -> Arc<BackingMap>;

    /// Removes this view's entries from `old` unless `old` is the current
    /// map; `None` when skipped. Holds off backing swaps while it runs.
    fn drain_from(&self, old: &BackingMap) -> Option<usize>;

    fn resolved_lifetime(&self) -> ResolvedLifetime;

    /// Merges and validates under the view's write lock.
    fn merge_lifetime(&self, overrides: Lifetime) -> Result<ResolvedLifetime, CacheError>;

    /// Submits a background regeneration; `false` if one is already running.
    fn refresh(&self, key: StoredKey) -> bool;

    fn record_eviction(&self);

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<K: CacheKey, S: ValueSlot> ErasedView for CacheView<K, S> {
    fn operation(&self) -> &OperationKey {
        &self.operation
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn key_type(&self) -> &'static str {
        core::any::type_name::<K>()
    }

    fn kind(&self) -> ValueKind {
        S::KIND
    }

    fn backing_map(&self) -> Arc<BackingMap> {
        self.backing()
    }

    fn swap_backing(&self, backing: Arc<BackingMap>) -> Arc<BackingMap> {
        core::mem::replace(&mut *self.backing.write(), backing)
    }

    fn drain_from(&self, old: &BackingMap) -> Option<usize> {
        let current = self.backing.read();
        if core::ptr::eq(&**current, old) {
            return None;
        }
        Some(old.drain_scope(self.scope))
    }

    fn resolved_lifetime(&self) -> ResolvedLifetime {
        *self.lifetime.read()
    }

    fn merge_lifetime(&self, overrides: Lifetime) -> Result<ResolvedLifetime, CacheError> {
        let mut lifetime = self.lifetime.write();
        let merged = lifetime.merge(overrides)?;
        *lifetime = merged;
        Ok(merged)
    }

    fn refresh(&self, key: StoredKey) -> bool {
        self.refresh_in_background(key)
    }

    fn record_eviction(&self) {
        self.metrics.record_eviction();
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
