//! Expiration and Refresh Policy
//!
//! A [`Lifetime`] is the declarative policy attached to an operation: how its
//! entries expire, how they are refreshed, the expiration interval and a size
//! bound. Every field is optional so that lifetimes can be layered: a code
//! generator supplies defaults, configuration supplies overrides, and
//! [`Lifetime::merge`] combines them field by field with the override winning
//! whenever it is set.
//!
//! [`Lifetime::resolve`] fills anything still unset from the global defaults
//! and validates the result, producing a [`ResolvedLifetime`] whose fields are
//! all concrete. Views only ever hold resolved lifetimes.
//!
//! | Field | Default |
//! |-------|---------|
//! | `expires` | [`Expires::Never`] |
//! | `refresh` | [`Refresh::None`] |
//! | `interval` | [`Duration::MAX`] |
//! | `max_size` | [`usize::MAX`] |
//!
//! # Examples
//!
//! ```
//! use memo_cache::{Expires, Lifetime, Refresh, TimeUnit};
//!
//! let base = Lifetime::new()
//!     .expires(Expires::Never)
//!     .refresh(Refresh::None)
//!     .interval(5, TimeUnit::Minutes)
//!     .max_size(100);
//!
//! let merged = base.merge(Lifetime::new().expires(Expires::Fixed));
//! let resolved = merged.resolve().unwrap();
//!
//! assert_eq!(resolved.expires(), Expires::Fixed);
//! assert_eq!(resolved.refresh(), Refresh::None);
//! assert_eq!(resolved.max_size(), 100);
//! ```

use crate::error::CacheError;
use core::fmt;
use core::time::Duration;

/// How an entry becomes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expires {
    /// Entries never become stale.
    Never,
    /// Entries become stale once the interval has elapsed since creation.
    Fixed,
    /// Entries become stale once the interval has elapsed since the last read.
    Accessed,
}

/// What happens to a stale entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Refresh {
    /// Stale entries are removed; the next reader regenerates.
    None,
    /// Same as `None`: regeneration happens on the next read.
    OnDemand,
    /// Stale entries stay visible while a background regeneration runs.
    Eager,
}

/// Unit for [`Lifetime::interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    /// Nanoseconds.
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
}

impl TimeUnit {
    /// Converts `amount` of this unit into a [`Duration`], saturating on overflow.
    pub fn duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(60 * 60)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(24 * 60 * 60)),
        }
    }
}

/// Default expiration mode applied by [`Lifetime::resolve`].
pub const DEFAULT_EXPIRES: Expires = Expires::Never;

/// Default refresh mode applied by [`Lifetime::resolve`].
pub const DEFAULT_REFRESH: Refresh = Refresh::None;

/// Default interval applied by [`Lifetime::resolve`].
pub const DEFAULT_INTERVAL: Duration = Duration::MAX;

/// Default size bound applied by [`Lifetime::resolve`].
pub const DEFAULT_MAX_SIZE: usize = usize::MAX;

/// Declarative, possibly partial, cache policy.
///
/// Unset fields (`None`) mean "inherit": they are filled by a later merge or
/// by [`resolve`](Lifetime::resolve).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifetime {
    /// Expiration mode.
    pub expires: Option<Expires>,
    /// Refresh mode.
    pub refresh: Option<Refresh>,
    /// Expiration interval.
    pub interval: Option<Duration>,
    /// Maximum number of entries. Carried through configuration but not enforced.
    pub max_size: Option<usize>,
}

impl Lifetime {
    /// Returns a lifetime with every field unset.
    pub const fn new() -> Self {
        Self {
            expires: None,
            refresh: None,
            interval: None,
            max_size: None,
        }
    }

    /// Sets the expiration mode.
    #[must_use]
    pub const fn expires(mut self, expires: Expires) -> Self {
        self.expires = Some(expires);
        self
    }

    /// Sets the refresh mode.
    #[must_use]
    pub const fn refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Sets the interval as an amount of `unit`.
    #[must_use]
    pub fn interval(mut self, amount: u64, unit: TimeUnit) -> Self {
        self.interval = Some(unit.duration(amount));
        self
    }

    /// Sets the interval directly.
    #[must_use]
    pub const fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the size bound.
    #[must_use]
    pub const fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Overlays `overrides` on `self`: each field set in `overrides` wins.
    #[must_use]
    pub fn merge(self, overrides: Lifetime) -> Lifetime {
        Lifetime {
            expires: overrides.expires.or(self.expires),
            refresh: overrides.refresh.or(self.refresh),
            interval: overrides.interval.or(self.interval),
            max_size: overrides.max_size.or(self.max_size),
        }
    }

    /// Returns `true` when every field is set.
    pub fn is_complete(&self) -> bool {
        self.expires.is_some()
            && self.refresh.is_some()
            && self.interval.is_some()
            && self.max_size.is_some()
    }

    /// Rejects the fields that are invalid on their own, whatever they are
    /// later merged with.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Policy`] when `max_size` is set to zero, or when
    /// both a time-based `expires` and a zero `interval` are set.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size == Some(0) {
            return Err(CacheError::policy("max_size must be at least 1"));
        }
        if let (Some(expires), Some(interval)) = (self.expires, self.interval) {
            if expires != Expires::Never && interval.is_zero() {
                return Err(CacheError::policy(format!(
                    "{expires:?} expiration needs a non-zero interval"
                )));
            }
        }
        Ok(())
    }

    /// Fills unset fields from the global defaults and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Policy`] when a time-based policy has a zero
    /// interval or when the size bound is zero.
    pub fn resolve(self) -> Result<ResolvedLifetime, CacheError> {
        let resolved = ResolvedLifetime {
            expires: self.expires.unwrap_or(DEFAULT_EXPIRES),
            refresh: self.refresh.unwrap_or(DEFAULT_REFRESH),
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            max_size: self.max_size.unwrap_or(DEFAULT_MAX_SIZE),
        };

        if resolved.expires != Expires::Never && resolved.interval.is_zero() {
            return Err(CacheError::policy(format!(
                "{:?} expiration needs a non-zero interval",
                resolved.expires
            )));
        }
        if resolved.max_size == 0 {
            return Err(CacheError::policy("max_size must be at least 1"));
        }

        Ok(resolved)
    }
}

/// Fully resolved cache policy; every field is concrete.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLifetime {
    expires: Expires,
    refresh: Refresh,
    interval: Duration,
    max_size: usize,
}

impl ResolvedLifetime {
    /// Expiration mode.
    pub fn expires(&self) -> Expires {
        self.expires
    }

    /// Refresh mode.
    pub fn refresh(&self) -> Refresh {
        self.refresh
    }

    /// Expiration interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Size bound.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Interval in whole milliseconds, saturating at `u64::MAX`.
    pub(crate) fn interval_millis(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }

    /// Merges `overrides` into this policy and resolves the result.
    ///
    /// # Errors
    ///
    /// See [`Lifetime::resolve`].
    pub fn merge(self, overrides: Lifetime) -> Result<ResolvedLifetime, CacheError> {
        Lifetime::from(self).merge(overrides).resolve()
    }
}

impl Default for ResolvedLifetime {
    fn default() -> Self {
        Self {
            expires: DEFAULT_EXPIRES,
            refresh: DEFAULT_REFRESH,
            interval: DEFAULT_INTERVAL,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

impl From<ResolvedLifetime> for Lifetime {
    fn from(resolved: ResolvedLifetime) -> Self {
        Lifetime {
            expires: Some(resolved.expires),
            refresh: Some(resolved.refresh),
            interval: Some(resolved.interval),
            max_size: Some(resolved.max_size),
        }
    }
}

impl fmt::Debug for ResolvedLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedLifetime")
            .field("expires", &self.expires)
            .field("refresh", &self.refresh)
            .field("interval", &self.interval)
            .field("max_size", &self.max_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Lifetime {
        Lifetime::new()
            .expires(Expires::Never)
            .refresh(Refresh::None)
            .interval(5, TimeUnit::Minutes)
            .max_size(100)
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let merged = base().merge(Lifetime::new().expires(Expires::Fixed));
        assert_eq!(
            merged,
            Lifetime::new()
                .expires(Expires::Fixed)
                .refresh(Refresh::None)
                .every(Duration::from_secs(300))
                .max_size(100)
        );
    }

    #[test]
    fn test_merge_with_empty_is_identity() {
        assert_eq!(base().merge(Lifetime::new()), base());
        assert_eq!(Lifetime::new().merge(base()), base());
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let resolved = Lifetime::new().resolve().unwrap();
        assert_eq!(resolved.expires(), Expires::Never);
        assert_eq!(resolved.refresh(), Refresh::None);
        assert_eq!(resolved.interval(), Duration::MAX);
        assert_eq!(resolved.max_size(), usize::MAX);
        assert_eq!(resolved, ResolvedLifetime::default());
        assert!(Lifetime::from(resolved).is_complete());
    }

    #[test]
    fn test_resolve_rejects_zero_interval() {
        let lifetime = Lifetime::new()
            .expires(Expires::Accessed)
            .every(Duration::ZERO);
        assert!(matches!(lifetime.resolve(), Err(CacheError::Policy { .. })));

        // A zero interval is harmless when nothing expires.
        let never = Lifetime::new().expires(Expires::Never).every(Duration::ZERO);
        assert!(never.resolve().is_ok());
    }

    #[test]
    fn test_resolve_rejects_zero_max_size() {
        assert!(matches!(
            Lifetime::new().max_size(0).resolve(),
            Err(CacheError::Policy { .. })
        ));
    }

    #[test]
    fn test_validate_checks_set_fields_only() {
        assert!(Lifetime::new().validate().is_ok());
        assert!(Lifetime::new().every(Duration::ZERO).validate().is_ok());
        assert!(Lifetime::new().expires(Expires::Fixed).validate().is_ok());
        assert!(matches!(
            Lifetime::new().max_size(0).validate(),
            Err(CacheError::Policy { .. })
        ));
        assert!(matches!(
            Lifetime::new()
                .expires(Expires::Fixed)
                .every(Duration::ZERO)
                .validate(),
            Err(CacheError::Policy { .. })
        ));
    }

    #[test]
    fn test_resolved_merge() {
        let resolved = base().resolve().unwrap();
        let updated = resolved
            .merge(Lifetime::new().refresh(Refresh::Eager))
            .unwrap();
        assert_eq!(updated.refresh(), Refresh::Eager);
        assert_eq!(updated.expires(), Expires::Never);
        assert_eq!(updated.interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_time_units() {
        assert_eq!(TimeUnit::Milliseconds.duration(100), Duration::from_millis(100));
        assert_eq!(TimeUnit::Hours.duration(2), Duration::from_secs(7200));
        assert_eq!(TimeUnit::Days.duration(1), Duration::from_secs(86_400));
        assert_eq!(
            TimeUnit::Minutes.duration(u64::MAX),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_interval_millis_saturates() {
        let resolved = Lifetime::new().resolve().unwrap();
        assert_eq!(resolved.interval_millis(), u64::MAX);

        let short = Lifetime::new()
            .expires(Expires::Fixed)
            .interval(100, TimeUnit::Milliseconds)
            .resolve()
            .unwrap();
        assert_eq!(short.interval_millis(), 100);
    }
}
