//! Cache Keys
//!
//! Keys handed to a view are *search* instances: callers may build them on the
//! stack, reuse them across calls or keep them mutable. Before a key is stored
//! it is turned into its *canonical* form through [`CacheKey::to_canonical`],
//! an owned, immutable instance that is safe to keep in a shared backing map.
//!
//! Several views can share one [`BackingMap`](crate::BackingMap), each with its
//! own key type. Stored keys are therefore type-erased and tagged with the scope
//! of the view that owns them; lookups use a borrowed [`Probe`] so that a hit
//! never allocates.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};
use hashbrown::Equivalent;
use std::sync::Arc;

/// A key type usable with a cache view.
///
/// Implementors must provide value equality and a hash consistent with it.
/// [`to_canonical`](CacheKey::to_canonical) produces the storage-safe form; the
/// default clones, which is right for plain value types. Override it when a
/// search instance holds borrowed or shared mutable state that must be
/// detached before the key is stored.
///
/// # Examples
///
/// ```
/// use memo_cache::CacheKey;
///
/// #[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// struct Point {
///     x: i32,
///     y: i32,
/// }
///
/// impl CacheKey for Point {}
///
/// #[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// struct Query {
///     terms: Vec<String>,
/// }
///
/// impl CacheKey for Query {
///     fn to_canonical(&self) -> Self {
///         let mut terms = self.terms.clone();
///         terms.shrink_to_fit();
///         Query { terms }
///     }
/// }
/// ```
pub trait CacheKey: Clone + Hash + Eq + fmt::Debug + Send + Sync + 'static {
    /// Returns the immutable form of this key that is kept in the backing map.
    fn to_canonical(&self) -> Self {
        self.clone()
    }
}

macro_rules! canonical_by_clone {
    ($($t:ty),* $(,)?) => {
        $(impl CacheKey for $t {})*
    };
}

canonical_by_clone!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, String,
);

impl<T: CacheKey> CacheKey for Option<T> {
    fn to_canonical(&self) -> Self {
        self.as_ref().map(CacheKey::to_canonical)
    }
}

impl<T: CacheKey> CacheKey for Vec<T> {
    fn to_canonical(&self) -> Self {
        self.iter().map(CacheKey::to_canonical).collect()
    }
}

macro_rules! canonical_tuple {
    ($($name:ident),+) => {
        impl<$($name: CacheKey),+> CacheKey for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_canonical(&self) -> Self {
                let ($($name,)+) = self;
                ($($name.to_canonical(),)+)
            }
        }
    };
}

canonical_tuple!(A, B);
canonical_tuple!(A, B, C);
canonical_tuple!(A, B, C, D);

/// Object-safe face of a [`CacheKey`], used for keys stored in a shared map.
pub(crate) trait ErasedKey: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn ErasedKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K: CacheKey> ErasedKey for K {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ErasedKey) -> bool {
        other
            .as_any()
            .downcast_ref::<K>()
            .is_some_and(|other| other == self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn dyn_fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Debug for dyn ErasedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dyn_fmt(f)
    }
}

/// Identifies the view that owns an entry inside a shared backing map.
pub(crate) type Scope = u64;

/// Canonical key as stored in a backing map: owning scope plus erased key.
///
/// Hashes exactly like a [`Probe`] over the same scope and key, so either can
/// be used to address the same slot.
#[derive(Clone, Debug)]
pub(crate) struct StoredKey {
    scope: Scope,
    key: Arc<dyn ErasedKey>,
}

impl StoredKey {
    /// Canonicalizes `key` and tags it with `scope`.
    pub(crate) fn canonical<K: CacheKey>(scope: Scope, key: &K) -> Self {
        Self {
            scope,
            key: Arc::new(key.to_canonical()),
        }
    }

    pub(crate) fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the key as `K` when it was stored with that type.
    pub(crate) fn downcast<K: CacheKey>(&self) -> Option<&K> {
        self.key.as_any().downcast_ref::<K>()
    }
}

impl Hash for StoredKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
        self.key.dyn_hash(state);
    }
}

impl PartialEq for StoredKey {
    fn eq(&self, other: &Self) -> bool {
        self.scope == other.scope && self.key.dyn_eq(&*other.key)
    }
}

impl Eq for StoredKey {}

/// Borrowed lookup key: addresses a stored entry without canonicalizing.
#[derive(Debug)]
pub(crate) struct Probe<'a, K> {
    scope: Scope,
    key: &'a K,
}

impl<'a, K: CacheKey> Probe<'a, K> {
    pub(crate) fn new(scope: Scope, key: &'a K) -> Self {
        Self { scope, key }
    }
}

impl<K: CacheKey> Hash for Probe<'_, K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scope.hash(state);
        self.key.hash(state);
    }
}

impl<K: CacheKey> Equivalent<StoredKey> for Probe<'_, K> {
    fn equivalent(&self, stored: &StoredKey) -> bool {
        stored.scope == self.scope && stored.downcast::<K>().is_some_and(|k| k == self.key)
    }
}
