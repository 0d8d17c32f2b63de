//! Cache Registry
//!
//! The [`CacheRegistry`] is the single authority over which views exist and how
//! they are configured. It owns:
//!
//! - the materialized views, one per [`OperationKey`]
//! - pending configuration for operations that have no view yet
//! - the default [`BackingMap`] new views are placed in
//! - the runtime shared with every view: clock, in-flight map and worker pool
//! - the background sweeper
//!
//! # Locking
//!
//! Registration and reconfiguration are serialized by one mutex around the
//! registry's bookkeeping. That lock is never held while a generator runs;
//! reads and writes through a view never touch it.
//!
//! # Lifecycle
//!
//! ```text
//!   set_lifetime / set_backing ──▶ PendingConfig ──┐
//!                                                  ├──▶ view() materializes
//!   default lifetime (caller) ─────────────────────┘      CacheView
//!                                                          │
//!                  set_lifetime: merge into the view ◀─────┤
//!                  set_backing:  swap + drain old map ◀────┘
//! ```
//!
//! # Examples
//!
//! ```
//! use memo_cache::{CacheRegistry, Expires, Lifetime, OperationKey, TimeUnit};
//! use std::convert::Infallible;
//!
//! let registry = CacheRegistry::new();
//! let op = OperationKey::new("Pricing", "quote", ["u32"]);
//!
//! let view = registry
//!     .int_view(
//!         op.clone(),
//!         |n: &u32| Ok::<_, Infallible>(*n as i32 * 2),
//!         Lifetime::new().expires(Expires::Fixed).interval(1, TimeUnit::Minutes),
//!     )
//!     .unwrap();
//!
//! assert_eq!(view.value(&21).unwrap(), 42);
//! assert_eq!(registry.operations(), vec![op]);
//! ```

use crate::backing::BackingMap;
use crate::config::RegistryConfig;
use crate::error::{BoxError, CacheError};
use crate::expiration::Clock;
use crate::flight::InFlight;
use crate::key::{CacheKey, Scope};
use crate::lifetime::{Lifetime, ResolvedLifetime};
use crate::operation::OperationKey;
use crate::pool::WorkerPool;
use crate::sweeper::{self, SweepStats, Sweeper};
use crate::view::{
    CacheView, DoubleCacheView, DoubleSlot, ErasedView, IntCacheView, IntSlot, LongCacheView,
    LongSlot, ObjectCacheView, ObjectSlot, ValueSlot,
};
use core::fmt;
use core::time::Duration;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// State shared by the registry and every view it creates.
pub(crate) struct Runtime {
    pub(crate) clock: Clock,
    pub(crate) flights: InFlight,
    pub(crate) pool: WorkerPool,
}

impl Runtime {
    fn new(config: &RegistryConfig) -> Self {
        Self {
            clock: Clock::new(),
            flights: InFlight::new(),
            pool: WorkerPool::new("memo-cache-worker", config.workers, config.queue_capacity),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("flights", &self.flights)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Configuration recorded for an operation before its view exists.
#[derive(Default)]
struct PendingConfig {
    lifetime: Option<Lifetime>,
    backing: Option<Arc<BackingMap>>,
}

struct Books {
    views: HashMap<OperationKey, Arc<dyn ErasedView>>,
    pending: HashMap<OperationKey, PendingConfig>,
    default_backing: Arc<BackingMap>,
    next_scope: Scope,
}

/// Registry internals reachable from the sweeper thread.
pub(crate) struct Shared {
    books: Mutex<Books>,
    runtime: Arc<Runtime>,
}

impl Shared {
    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Distinct backing maps in use and the views that own entries in them,
    /// keyed by scope.
    pub(crate) fn sweep_targets(&self) -> (Vec<Arc<BackingMap>>, HashMap<Scope, Arc<dyn ErasedView>>) {
        let books = self.books.lock();
        let mut maps: Vec<Arc<BackingMap>> = vec![Arc::clone(&books.default_backing)];
        let mut views = HashMap::with_capacity(books.views.len());

        for view in books.views.values() {
            let backing = view.backing_map();
            if !maps.iter().any(|m| Arc::ptr_eq(m, &backing)) {
                maps.push(backing);
            }
            views.insert(view.scope(), Arc::clone(view));
        }
        (maps, views)
    }

    /// Empties `old` of `view`'s entries on the worker pool.
    ///
    /// Skipped if the view has moved back onto `old` by the time the job runs.
    fn drain_later(&self, view: &Arc<dyn ErasedView>, old: Arc<BackingMap>) {
        let scope = view.scope();
        let operation = view.operation().clone();
        let view = Arc::downgrade(view);
        self.runtime.pool.execute(move || {
            let removed = match view.upgrade() {
                Some(view) => view.drain_from(&old),
                None => Some(old.drain_scope(scope)),
            };
            let Some(removed) = removed else {
                debug!(operation = %operation, "skipped drain of current backing map");
                return;
            };
            debug!(operation = %operation, removed, "drained previous backing map");
        });
    }
}

/// Owns every cache view of a process (or of one component).
///
/// Construct one with [`CacheRegistry::new`] or [`CacheRegistry::init`] and
/// pass it by reference to whatever needs caching. Dropping the registry stops
/// the sweeper; views handed out earlier keep working on their own.
pub struct CacheRegistry {
    sweeper: Sweeper,
    shared: Arc<Shared>,
}

impl CacheRegistry {
    /// Creates a registry with [`RegistryConfig::default`].
    pub fn new() -> Self {
        Self::init(RegistryConfig::default())
    }

    /// Creates a registry from `config` and starts its sweeper.
    ///
    /// # Panics
    ///
    /// Panics if `config.segments` is 0.
    pub fn init(config: RegistryConfig) -> Self {
        let shared = Arc::new(Shared {
            books: Mutex::new(Books {
                views: HashMap::new(),
                pending: HashMap::new(),
                default_backing: Arc::new(BackingMap::with_segments(config.segments)),
                next_scope: 1,
            }),
            runtime: Arc::new(Runtime::new(&config)),
        });
        let sweeper = Sweeper::start(Arc::downgrade(&shared), config.sweep_interval);
        debug!(?config, workers = shared.runtime.pool.workers(), "cache registry started");

        Self { sweeper, shared }
    }

    /// Returns the view for `operation`, creating it on first request.
    ///
    /// On creation, the view's lifetime is `default_lifetime` merged with any
    /// pending override and then resolved; its backing map is the pending
    /// override or else the registry's default map. Once a view exists,
    /// `generator` and `default_lifetime` are ignored: the first registration
    /// wins.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Configuration`] if `operation` is already registered
    ///   with a different key type or value kind.
    /// - [`CacheError::Policy`] if the effective lifetime does not validate.
    pub fn view<K, S, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<CacheView<K, S>>, CacheError>
    where
        K: CacheKey,
        S: ValueSlot,
        F: Fn(&K) -> Result<S::Value, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let mut books = self.shared.books.lock();

        if let Some(existing) = books.views.get(&operation) {
            let (key_type, kind) = (existing.key_type(), existing.kind());
            return Arc::clone(existing)
                .into_any()
                .downcast::<CacheView<K, S>>()
                .map_err(|_| CacheError::Configuration {
                    operation: operation.clone(),
                    reason: format!(
                        "registered as {} view keyed by {key_type}, requested {} view keyed by {}",
                        kind.name(),
                        S::KIND.name(),
                        core::any::type_name::<K>()
                    ),
                });
        }

        let pending = books.pending.get(&operation);
        let lifetime = match pending.and_then(|p| p.lifetime) {
            Some(overrides) => default_lifetime.merge(overrides),
            None => default_lifetime,
        }
        .resolve()?;
        let backing = pending
            .and_then(|p| p.backing.clone())
            .unwrap_or_else(|| Arc::clone(&books.default_backing));

        let scope = books.next_scope;
        books.next_scope += 1;

        let view = CacheView::<K, S>::new(
            operation.clone(),
            scope,
            backing,
            lifetime,
            generator,
            Arc::clone(&self.shared.runtime),
        );
        books.pending.remove(&operation);
        books.views.insert(operation.clone(), view.clone());

        debug!(operation = %operation, kind = S::KIND.name(), ?lifetime, "materialized view");
        Ok(view)
    }

    /// [`view`](Self::view) for `i32` values.
    pub fn int_view<K, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<IntCacheView<K>>, CacheError>
    where
        K: CacheKey,
        F: Fn(&K) -> Result<i32, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.view::<K, IntSlot, F, E>(operation, generator, default_lifetime)
    }

    /// [`view`](Self::view) for `bool` values, stored in the `i32` slot.
    pub fn bool_view<K, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<IntCacheView<K>>, CacheError>
    where
        K: CacheKey,
        F: Fn(&K) -> Result<bool, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.int_view(
            operation,
            move |key: &K| generator(key).map(i32::from),
            default_lifetime,
        )
    }

    /// [`view`](Self::view) for `i64` values.
    pub fn long_view<K, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<LongCacheView<K>>, CacheError>
    where
        K: CacheKey,
        F: Fn(&K) -> Result<i64, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.view::<K, LongSlot, F, E>(operation, generator, default_lifetime)
    }

    /// [`view`](Self::view) for `f64` values.
    pub fn double_view<K, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<DoubleCacheView<K>>, CacheError>
    where
        K: CacheKey,
        F: Fn(&K) -> Result<f64, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.view::<K, DoubleSlot, F, E>(operation, generator, default_lifetime)
    }

    /// [`view`](Self::view) for arbitrary values.
    pub fn object_view<K, V, F, E>(
        &self,
        operation: OperationKey,
        generator: F,
        default_lifetime: Lifetime,
    ) -> Result<Arc<ObjectCacheView<K, V>>, CacheError>
    where
        K: CacheKey,
        V: Clone + Send + Sync + 'static,
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.view::<K, ObjectSlot<V>, F, E>(operation, generator, default_lifetime)
    }

    /// The lifetime configured for `operation`.
    ///
    /// Returns the view's resolved lifetime once it exists, the pending
    /// (possibly partial) override before that, or `None` if nothing has been
    /// configured.
    pub fn lifetime(&self, operation: &OperationKey) -> Option<Lifetime> {
        let books = self.shared.books.lock();
        match books.views.get(operation) {
            Some(view) => Some(Lifetime::from(view.resolved_lifetime())),
            None => books.pending.get(operation).and_then(|p| p.lifetime),
        }
    }

    /// Merges `overrides` into the lifetime of `operation`.
    ///
    /// Applies to the view if it exists, otherwise to the pending
    /// configuration that the view will pick up when it is created.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Policy`] if the view exists and the merged
    /// lifetime does not validate, or if the pending overrides are invalid on
    /// their own (see [`Lifetime::validate`]). In both cases nothing changes.
    pub fn set_lifetime(&self, operation: &OperationKey, overrides: Lifetime) -> Result<(), CacheError> {
        let mut books = self.shared.books.lock();
        if let Some(view) = books.views.get(operation) {
            let resolved = view.merge_lifetime(overrides)?;
            debug!(operation = %operation, lifetime = ?resolved, "updated lifetime");
            return Ok(());
        }

        let pending = books.pending.entry(operation.clone()).or_default();
        let merged = match pending.lifetime {
            Some(current) => current.merge(overrides),
            None => overrides,
        };
        merged.validate()?;
        pending.lifetime = Some(merged);
        Ok(())
    }

    /// The resolved lifetime of a materialized view.
    pub fn resolved_lifetime(&self, operation: &OperationKey) -> Option<ResolvedLifetime> {
        self.shared
            .books
            .lock()
            .views
            .get(operation)
            .map(|view| view.resolved_lifetime())
    }

    /// The backing map configured for `operation`, or `None` if the view does
    /// not exist and no backing map is pending.
    pub fn backing(&self, operation: &OperationKey) -> Option<Arc<BackingMap>> {
        let books = self.shared.books.lock();
        match books.views.get(operation) {
            Some(view) => Some(view.backing_map()),
            None => books.pending.get(operation).and_then(|p| p.backing.clone()),
        }
    }

    /// Moves `operation` onto `backing`.
    ///
    /// For an existing view, the reference is swapped at once and the view's
    /// entries are removed from the previous map in the background. Other
    /// views sharing the previous map keep their entries.
    pub fn set_backing(&self, operation: &OperationKey, backing: Arc<BackingMap>) {
        let mut books = self.shared.books.lock();
        if let Some(view) = books.views.get(operation) {
            let old = view.swap_backing(backing);
            if !Arc::ptr_eq(&old, &view.backing_map()) {
                debug!(operation = %operation, "swapped backing map");
                self.shared.drain_later(view, old);
            }
            return;
        }
        books.pending.entry(operation.clone()).or_default().backing = Some(backing);
    }

    /// The map new views are placed in.
    pub fn default_backing(&self) -> Arc<BackingMap> {
        Arc::clone(&self.shared.books.lock().default_backing)
    }

    /// Replaces the default map.
    ///
    /// Every view and pending configuration still pointing at the previous
    /// default moves to `backing`; the moved views' entries are drained from
    /// the previous default in the background.
    pub fn set_default_backing(&self, backing: Arc<BackingMap>) {
        let mut books = self.shared.books.lock();
        let old = core::mem::replace(&mut books.default_backing, Arc::clone(&backing));
        if Arc::ptr_eq(&old, &backing) {
            return;
        }

        let mut moved = 0usize;
        for view in books.views.values() {
            if Arc::ptr_eq(&view.backing_map(), &old) {
                view.swap_backing(Arc::clone(&backing));
                self.shared.drain_later(view, Arc::clone(&old));
                moved += 1;
            }
        }
        for pending in books.pending.values_mut() {
            if pending.backing.as_ref().is_some_and(|b| Arc::ptr_eq(b, &old)) {
                pending.backing = Some(Arc::clone(&backing));
            }
        }
        debug!(moved, "replaced default backing map");
    }

    /// Operations that have a materialized view.
    pub fn operations(&self) -> Vec<OperationKey> {
        self.shared.books.lock().views.keys().cloned().collect()
    }

    /// Delay between sweep passes.
    pub fn sweep_interval(&self) -> Duration {
        self.sweeper.interval()
    }

    /// Changes the delay between sweep passes, effective for the next wait.
    pub fn set_sweep_interval(&self, interval: Duration) {
        self.sweeper.set_interval(interval);
    }

    /// Runs one sweep pass on the calling thread and waits for it to finish.
    pub fn sweep_now(&self) -> SweepStats {
        sweeper::sweep(&self.shared)
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let books = self.shared.books.lock();
        f.debug_struct("CacheRegistry")
            .field("views", &books.views.len())
            .field("pending", &books.pending.len())
            .field("default_backing", &books.default_backing)
            .field("runtime", &self.shared.runtime)
            .field("sweep_interval", &self.sweeper.interval())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::{Expires, Refresh, TimeUnit};
    use crate::view::KeyView;
    use std::convert::Infallible;

    fn registry() -> CacheRegistry {
        CacheRegistry::init(RegistryConfig {
            workers: 1,
            queue_capacity: 4,
            ..RegistryConfig::default()
        })
    }

    fn op(name: &str) -> OperationKey {
        OperationKey::new("RegistryTests", name, ["u32"])
    }

    #[test]
    fn test_view_is_idempotent() {
        let registry = registry();
        let first = registry
            .int_view(op("same"), |_: &u32| Ok::<_, Infallible>(1), Lifetime::new())
            .unwrap();
        let second = registry
            .int_view(op("same"), |_: &u32| Ok::<_, Infallible>(2), Lifetime::new())
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.value(&0).unwrap(), 1);
        assert_eq!(registry.operations(), vec![op("same")]);
    }

    #[test]
    fn test_conflicting_registration() {
        let registry = registry();
        registry
            .int_view(op("conflict"), |_: &u32| Ok::<_, Infallible>(1), Lifetime::new())
            .unwrap();

        let kind = registry.long_view(op("conflict"), |_: &u32| Ok::<_, Infallible>(1), Lifetime::new());
        assert!(matches!(kind, Err(CacheError::Configuration { .. })));

        let key = registry.int_view(op("conflict"), |_: &u64| Ok::<_, Infallible>(1), Lifetime::new());
        assert!(matches!(key, Err(CacheError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_default_lifetime() {
        let registry = registry();
        let result = registry.int_view(
            op("invalid"),
            |_: &u32| Ok::<_, Infallible>(1),
            Lifetime::new().expires(Expires::Fixed).every(Duration::ZERO),
        );
        assert!(matches!(result, Err(CacheError::Policy { .. })));
        assert!(registry.operations().is_empty());
    }

    #[test]
    fn test_pending_lifetime_applies_on_materialization() {
        let registry = registry();
        assert_eq!(registry.lifetime(&op("pending")), None);

        registry
            .set_lifetime(&op("pending"), Lifetime::new().expires(Expires::Accessed))
            .unwrap();
        registry
            .set_lifetime(&op("pending"), Lifetime::new().refresh(Refresh::Eager))
            .unwrap();
        assert_eq!(
            registry.lifetime(&op("pending")),
            Some(Lifetime::new().expires(Expires::Accessed).refresh(Refresh::Eager))
        );
        assert_eq!(registry.resolved_lifetime(&op("pending")), None);

        let view = registry
            .int_view(
                op("pending"),
                |_: &u32| Ok::<_, Infallible>(1),
                Lifetime::new()
                    .expires(Expires::Fixed)
                    .interval(5, TimeUnit::Minutes),
            )
            .unwrap();

        let lifetime = view.lifetime();
        assert_eq!(lifetime.expires(), Expires::Accessed);
        assert_eq!(lifetime.refresh(), Refresh::Eager);
        assert_eq!(lifetime.interval(), Duration::from_secs(300));
        assert_eq!(registry.resolved_lifetime(&op("pending")), Some(lifetime));
    }

    #[test]
    fn test_set_lifetime_on_view() {
        let registry = registry();
        let view = registry
            .int_view(op("live"), |_: &u32| Ok::<_, Infallible>(1), Lifetime::new())
            .unwrap();

        registry
            .set_lifetime(&op("live"), Lifetime::new().expires(Expires::Fixed).interval(1, TimeUnit::Seconds))
            .unwrap();
        assert_eq!(view.lifetime().expires(), Expires::Fixed);

        let err = registry.set_lifetime(&op("live"), Lifetime::new().every(Duration::ZERO));
        assert!(matches!(err, Err(CacheError::Policy { .. })));
        assert_eq!(view.lifetime().interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_pending_backing() {
        let registry = registry();
        let dedicated = Arc::new(BackingMap::with_segments(2));
        registry.set_backing(&op("dedicated"), Arc::clone(&dedicated));
        assert!(Arc::ptr_eq(&registry.backing(&op("dedicated")).unwrap(), &dedicated));

        let view = registry
            .int_view(op("dedicated"), |_: &u32| Ok::<_, Infallible>(5), Lifetime::new())
            .unwrap();
        view.value(&1).unwrap();

        assert!(Arc::ptr_eq(&view.backing(), &dedicated));
        assert_eq!(dedicated.len(), 1);
        assert!(registry.default_backing().is_empty());
        assert!(registry.backing(&op("unknown")).is_none());
    }

    #[test]
    fn test_debug_output() {
        let registry = registry();
        registry
            .int_view(op("debug"), |_: &u32| Ok::<_, Infallible>(1), Lifetime::new())
            .unwrap();
        let rendered = format!("{registry:?}");
        assert!(rendered.contains("CacheRegistry"));
        assert!(rendered.contains("views: 1"));
    }
}
