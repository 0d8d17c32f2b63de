#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            CacheRegistry                              │
//! │                                                                       │
//! │   books (one mutex)               runtime (shared with every view)    │
//! │   ├─ views:   OperationKey ─▶ view   ├─ Clock (ms since start)        │
//! │   ├─ pending: OperationKey ─▶ config ├─ InFlight (single-flight)      │
//! │   └─ default BackingMap              └─ WorkerPool                    │
//! │                                                                       │
//! │   Sweeper thread ── every sweep_interval ──▶ scan each BackingMap     │
//! └──────────────────────────────────────────────────────────────────────┘
//!          │ view()
//!          ▼
//!   CacheView<K, S> ── value / get / put / dirty ──▶ Arc<BackingMap>
//!                                                     (shared, striped)
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Role |
//! |------|------|
//! | [`CacheRegistry`] | Creates views, holds per-operation configuration |
//! | [`CacheView`] | Typed handle for one operation ([`IntCacheView`], [`LongCacheView`], [`DoubleCacheView`], [`ObjectCacheView`]) |
//! | [`KeyView`] | Key-level operations common to all views |
//! | [`OperationKey`] | Identity of a cached operation |
//! | [`Lifetime`] | Expiration and refresh policy, layered by merge |
//! | [`BackingMap`] | Concurrent store shared by views |
//! | [`CacheKey`] | Key trait with a canonical, storage-safe form |
//!
//! ## Policies
//!
//! | Expires | Stale when |
//! |---------|------------|
//! | [`Expires::Never`] | never |
//! | [`Expires::Fixed`] | `now - created > interval` |
//! | [`Expires::Accessed`] | `now - last read > interval` |
//!
//! | Refresh | Stale entry on read | Stale entry in sweep |
//! |---------|---------------------|----------------------|
//! | [`Refresh::None`] / [`Refresh::OnDemand`] | regenerated before returning | removed |
//! | [`Refresh::Eager`] | served, regenerated in background | regenerated in background |
//!
//! ## Reconfiguring at Runtime
//!
//! ```rust
//! use memo_cache::{BackingMap, CacheRegistry, KeyView, Lifetime, OperationKey, Refresh};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! let registry = CacheRegistry::new();
//! let squares = OperationKey::new("Math", "square", ["i64"]);
//! let cubes = OperationKey::new("Math", "cube", ["i64"]);
//!
//! // Configuration may precede the view.
//! registry.set_lifetime(&squares, Lifetime::new().refresh(Refresh::OnDemand)).unwrap();
//!
//! let sq = registry
//!     .long_view(squares.clone(), |n: &i64| Ok::<_, Infallible>(n * n), Lifetime::new())
//!     .unwrap();
//! let cu = registry
//!     .long_view(cubes, |n: &i64| Ok::<_, Infallible>(n * n * n), Lifetime::new())
//!     .unwrap();
//! assert_eq!(sq.lifetime().refresh(), Refresh::OnDemand);
//!
//! sq.value(&3).unwrap();
//! cu.value(&3).unwrap();
//!
//! // Move one operation to its own map; the other keeps its entries.
//! registry.set_backing(&squares, Arc::new(BackingMap::new()));
//! assert_eq!(cu.size(), 1);
//! assert_eq!(cu.get(&3), Some(27));
//! ```

/// Operation identity.
///
/// Provides [`OperationKey`], the namespace under which every view,
/// lifetime and backing-map override is registered.
pub mod operation;

/// Cache key trait and type-erased stored keys.
pub mod key;

/// Expiration and refresh policy with override-merge semantics.
pub mod lifetime;

/// Stored entries, payloads and the staleness state machine.
pub mod expiration;

/// Lock-striped concurrent backing maps.
pub mod backing;

/// Single-flight generation: one producer per key, everyone else waits.
pub(crate) mod flight;

/// Background worker pool with caller-runs overflow.
pub(crate) mod pool;

/// Typed cache views.
///
/// Provides [`CacheView`] with its value-kind specializations and the
/// [`KeyView`] operations they share.
pub mod view;

/// The cache registry.
pub mod registry;

/// Background sweeping of stale entries.
pub mod sweeper;

/// Registry configuration.
pub mod config;

/// Per-view metrics.
///
/// Each view counts hits, misses, generations and sweeper activity and
/// reports them through the [`CacheMetrics`] trait.
pub mod metrics;

/// Error types.
pub mod error;

pub use backing::BackingMap;
pub use config::RegistryConfig;
pub use error::{BoxError, CacheError};
pub use expiration::{Clock, Expiration, Payload, Staleness, ValueKind};
pub use key::CacheKey;
pub use lifetime::{Expires, Lifetime, Refresh, ResolvedLifetime, TimeUnit};
pub use metrics::{CacheMetrics, ViewMetrics};
pub use operation::OperationKey;
pub use registry::CacheRegistry;
pub use sweeper::SweepStats;
pub use view::{
    CacheView, DoubleCacheView, DoubleSlot, IntCacheView, IntSlot, KeyView, Keys, LongCacheView,
    LongSlot, ObjectCacheView, ObjectSlot, ValueSlot,
};
