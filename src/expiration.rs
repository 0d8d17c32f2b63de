//! Expiration Entries
//!
//! An [`Expiration`] is what a backing map actually stores: the computed value
//! plus the two timestamps needed to judge staleness. Values are held in a
//! [`Payload`] so that the primitive specializations (`i32`, `i64`, `f64`) stay
//! unboxed; only object values go through `Arc<dyn Any>`.
//!
//! # Timestamps
//!
//! Timestamps are milliseconds since the registry's [`Clock`] epoch. The last
//! access time lives in an `AtomicU64` so that reads under
//! [`Expires::Accessed`] can touch an entry through a shared reference. The
//! value `u64::MAX` is reserved as the *dirty* sentinel.
//!
//! # State Machine
//!
//! ```text
//!   created ──▶ Fresh ──(interval elapsed)──▶ Stale
//!                 │  ▲                          │
//!                 │  └──── touch (Accessed) ────┘ (Fresh only)
//!                 │
//!                 └──────── mark_dirty ───────▶ Dirty (terminal)
//! ```
//!
//! A dirty entry stays dirty until it is removed or replaced by a newly
//! generated entry.

use crate::lifetime::{Expires, ResolvedLifetime};
use core::any::Any;
use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Sentinel stored in the access timestamp of a dirty entry.
pub(crate) const DIRTY: u64 = u64::MAX;

/// The value kinds a view can store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 32-bit integers; also backs `bool`, `i16` and `i8` accessors.
    Int,
    /// 64-bit integers.
    Long,
    /// 64-bit floats; also backs `f32` accessors.
    Double,
    /// Arbitrary `Clone + Send + Sync` values.
    Object,
}

impl ValueKind {
    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "Int",
            ValueKind::Long => "Long",
            ValueKind::Double => "Double",
            ValueKind::Object => "Object",
        }
    }
}

/// A stored value, tagged by kind.
#[derive(Clone)]
pub enum Payload {
    /// An `i32` value.
    Int(i32),
    /// An `i64` value.
    Long(i64),
    /// An `f64` value.
    Double(f64),
    /// Any other value.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    /// The kind of value held.
    pub fn kind(&self) -> ValueKind {
        match self {
            Payload::Int(_) => ValueKind::Int,
            Payload::Long(_) => ValueKind::Long,
            Payload::Double(_) => ValueKind::Double,
            Payload::Object(_) => ValueKind::Object,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Payload::Long(v) => f.debug_tuple("Long").field(v).finish(),
            Payload::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Payload::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Staleness of an entry under a given policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Within its interval.
    Fresh,
    /// Past its interval but still present.
    Stale,
    /// Explicitly invalidated.
    Dirty,
}

/// Coarse millisecond clock anchored at registry creation.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// Starts a clock at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since the epoch. Never returns the dirty sentinel.
    pub fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis())
            .unwrap_or(DIRTY - 1)
            .min(DIRTY - 1)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// A stored value with its creation and last-access timestamps.
pub struct Expiration {
    created: u64,
    accessed: AtomicU64,
    value: Payload,
}

impl Expiration {
    /// Creates a fresh entry stamped at `now`.
    pub(crate) fn new(value: Payload, now: u64) -> Self {
        Self {
            created: now,
            accessed: AtomicU64::new(now),
            value,
        }
    }

    /// Creation time in milliseconds since the clock epoch.
    pub fn created(&self) -> u64 {
        self.created
    }

    /// Last access time, or `None` once the entry is dirty.
    pub fn accessed(&self) -> Option<u64> {
        match self.accessed.load(Ordering::Acquire) {
            DIRTY => None,
            at => Some(at),
        }
    }

    /// The stored value.
    pub fn value(&self) -> &Payload {
        &self.value
    }

    /// Returns `true` once [`mark_dirty`](Self::mark_dirty) has been called.
    pub fn is_dirty(&self) -> bool {
        self.accessed.load(Ordering::Acquire) == DIRTY
    }

    /// Moves the access time forward to `now`.
    ///
    /// Never moves it backwards and never clears the dirty sentinel.
    pub(crate) fn touch(&self, now: u64) {
        let _ = self
            .accessed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != DIRTY && current < now).then_some(now)
            });
    }

    /// Marks the entry dirty. Permanent for this entry.
    pub(crate) fn mark_dirty(&self) {
        self.accessed.store(DIRTY, Ordering::Release);
    }

    /// Judges the entry against `lifetime` at time `now`.
    pub fn staleness(&self, lifetime: &ResolvedLifetime, now: u64) -> Staleness {
        let accessed = match self.accessed() {
            Some(at) => at,
            None => return Staleness::Dirty,
        };

        let since = match lifetime.expires() {
            Expires::Never => return Staleness::Fresh,
            Expires::Fixed => self.created,
            Expires::Accessed => accessed,
        };

        if now.saturating_sub(since) > lifetime.interval_millis() {
            Staleness::Stale
        } else {
            Staleness::Fresh
        }
    }
}

impl fmt::Debug for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expiration")
            .field("created", &self.created)
            .field("accessed", &self.accessed())
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::{Lifetime, TimeUnit};

    fn policy(expires: Expires, millis: u64) -> ResolvedLifetime {
        Lifetime::new()
            .expires(expires)
            .interval(millis, TimeUnit::Milliseconds)
            .resolve()
            .unwrap()
    }

    #[test]
    fn test_new_entry_is_fresh() {
        let entry = Expiration::new(Payload::Int(7), 1_000);
        assert_eq!(entry.created(), 1_000);
        assert_eq!(entry.accessed(), Some(1_000));
        assert!(!entry.is_dirty());
        assert_eq!(entry.value().kind(), ValueKind::Int);
    }

    #[test]
    fn test_never_is_never_stale() {
        let entry = Expiration::new(Payload::Long(1), 0);
        let never = policy(Expires::Never, 1);
        assert_eq!(entry.staleness(&never, u64::MAX - 1), Staleness::Fresh);
    }

    #[test]
    fn test_fixed_ignores_reads() {
        let entry = Expiration::new(Payload::Double(1.5), 0);
        let fixed = policy(Expires::Fixed, 1_000);

        entry.touch(900);
        assert_eq!(entry.staleness(&fixed, 1_000), Staleness::Fresh);
        entry.touch(1_000);
        assert_eq!(entry.staleness(&fixed, 1_001), Staleness::Stale);
    }

    #[test]
    fn test_accessed_resets_on_touch() {
        let entry = Expiration::new(Payload::Int(1), 0);
        let accessed = policy(Expires::Accessed, 1_000);

        for step in 1..=10 {
            let now = step * 500;
            assert_eq!(entry.staleness(&accessed, now), Staleness::Fresh);
            entry.touch(now);
        }
        assert_eq!(entry.staleness(&accessed, 5_000 + 1_001), Staleness::Stale);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let entry = Expiration::new(Payload::Int(1), 100);
        entry.touch(50);
        assert_eq!(entry.accessed(), Some(100));
        entry.touch(200);
        assert_eq!(entry.accessed(), Some(200));
    }

    #[test]
    fn test_dirty_is_terminal() {
        let entry = Expiration::new(Payload::Int(1), 0);
        let never = policy(Expires::Never, 1);

        entry.mark_dirty();
        assert!(entry.is_dirty());
        assert_eq!(entry.accessed(), None);
        assert_eq!(entry.staleness(&never, 0), Staleness::Dirty);

        entry.touch(10);
        assert!(entry.is_dirty());
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_ne!(b, DIRTY);
    }
}
