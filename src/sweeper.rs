//! Background Sweeper
//!
//! A dedicated thread applies each view's expiration policy to entries nobody
//! is reading. Every pass:
//!
//! 1. collects the distinct backing maps in use and the views owning entries
//!    in them (under the registry lock, nothing else)
//! 2. submits one scan job per map to the worker pool
//! 3. waits for every job and logs the totals
//!
//! For each stale or dirty entry the owning view's refresh mode decides:
//!
//! | Refresh | Action |
//! |---------|--------|
//! | `None`, `OnDemand` | remove; the next reader regenerates |
//! | `Eager` | leave the value visible and regenerate in the background |
//!
//! The next pass is scheduled only after the current one has finished, so
//! passes never overlap. A pass that panics is logged and the loop carries on.
//! Dropping the [`Sweeper`] disconnects its control channel and joins the
//! thread.

use crate::backing::BackingMap;
use crate::expiration::Staleness;
use crate::key::Scope;
use crate::lifetime::Refresh;
use crate::registry::Shared;
use crate::view::ErasedView;
use core::ops::AddAssign;
use core::time::Duration;
use crossbeam_channel::{RecvTimeoutError, Sender};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Totals of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Backing maps visited.
    pub maps: usize,
    /// Entries examined.
    pub scanned: usize,
    /// Stale or dirty entries removed.
    pub evicted: usize,
    /// Background regenerations submitted.
    pub refreshed: usize,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.maps += other.maps;
        self.scanned += other.scanned;
        self.evicted += other.evicted;
        self.refreshed += other.refreshed;
    }
}

/// Handle to the sweeper thread.
pub(crate) struct Sweeper {
    interval: Arc<Mutex<Duration>>,
    control: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn start(shared: Weak<Shared>, interval: Duration) -> Self {
        let interval = Arc::new(Mutex::new(interval));
        let (control, signals) = crossbeam_channel::unbounded::<()>();

        let schedule = Arc::clone(&interval);
        let handle = thread::Builder::new()
            .name("memo-cache-sweeper".to_string())
            .spawn(move || loop {
                let wait = *schedule.lock();
                match signals.recv_timeout(wait) {
                    Ok(()) => continue,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                let Some(registry) = shared.upgrade() else {
                    break;
                };
                if panic::catch_unwind(AssertUnwindSafe(|| sweep(&registry))).is_err() {
                    warn!("sweep pass panicked; retrying next cycle");
                }
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn sweeper; only sweep_now will sweep");
                None
            }
        };

        Self {
            interval,
            control: Some(control),
            handle,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        *self.interval.lock()
    }

    /// Stores the new interval and wakes the thread so it re-arms its wait.
    pub(crate) fn set_interval(&self, interval: Duration) {
        *self.interval.lock() = interval;
        if let Some(control) = &self.control {
            let _ = control.send(());
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.control.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl core::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

/// Runs one pass over every backing map, fanning out onto the worker pool.
pub(crate) fn sweep(shared: &Shared) -> SweepStats {
    let (maps, views) = shared.sweep_targets();
    let runtime = shared.runtime();
    let views = Arc::new(views);
    let now = runtime.clock.now();

    let (results, collected) = crossbeam_channel::unbounded::<SweepStats>();
    for map in maps {
        let views = Arc::clone(&views);
        let results = results.clone();
        runtime.pool.execute(move || {
            let _ = results.send(sweep_map(&map, &views, now));
        });
    }
    drop(results);

    // A job that panicked drops its sender without reporting.
    let mut stats = SweepStats::default();
    for partial in collected.iter() {
        stats += partial;
    }

    debug!(
        maps = stats.maps,
        scanned = stats.scanned,
        evicted = stats.evicted,
        refreshed = stats.refreshed,
        "sweep pass complete"
    );
    stats
}

fn sweep_map(map: &BackingMap, views: &HashMap<Scope, Arc<dyn ErasedView>>, now: u64) -> SweepStats {
    let mut stats = SweepStats {
        maps: 1,
        ..SweepStats::default()
    };

    for idx in 0..map.segment_count() {
        for (key, entry) in map.snapshot_segment(idx) {
            stats.scanned += 1;

            let Some(view) = views.get(&key.scope()) else {
                continue;
            };
            // Left behind in a map the view no longer uses.
            if !core::ptr::eq(&*view.backing_map(), map) {
                if map.remove_if_same(&key, &entry) {
                    stats.evicted += 1;
                }
                continue;
            }
            let lifetime = view.resolved_lifetime();
            if entry.staleness(&lifetime, now) == Staleness::Fresh {
                continue;
            }

            if lifetime.refresh() == Refresh::Eager {
                if view.refresh(key) {
                    stats.refreshed += 1;
                }
            } else if map.remove_if_same(&key, &entry) {
                view.record_eviction();
                stats.evicted += 1;
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiration::{Expiration, Payload};
    use crate::key::StoredKey;
    use crate::lifetime::Lifetime;
    use crate::operation::OperationKey;
    use crate::CacheRegistry;
    use std::convert::Infallible;
    use std::time::Instant;

    #[test]
    fn test_sweep_evicts_entries_left_in_previous_map() {
        let registry = CacheRegistry::new();
        let op = OperationKey::new("SweeperTests", "moved", ["u32"]);
        let view = registry
            .int_view(op.clone(), |k: &u32| Ok::<_, Infallible>(*k as i32), Lifetime::new())
            .unwrap();
        view.value(&1).unwrap();

        let old = registry.default_backing();
        let dedicated = Arc::new(BackingMap::new());
        registry.set_backing(&op, Arc::clone(&dedicated));
        let deadline = Instant::now() + Duration::from_secs(5);
        while !old.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(old.is_empty());

        // A late insert that raced the drain.
        let scope = ErasedView::scope(&*view);
        old.insert(
            StoredKey::canonical(scope, &2u32),
            Arc::new(Expiration::new(Payload::Int(2), 0)),
        );
        view.value(&3).unwrap();

        let stats = registry.sweep_now();
        assert_eq!(stats.evicted, 1);
        assert!(old.is_empty());
        assert_eq!(dedicated.len(), 1);
        assert_eq!(view.get(&3), Some(3));
    }

    #[test]
    fn test_stats_accumulate() {
        let mut total = SweepStats::default();
        total += SweepStats {
            maps: 1,
            scanned: 10,
            evicted: 2,
            refreshed: 0,
        };
        total += SweepStats {
            maps: 1,
            scanned: 5,
            evicted: 0,
            refreshed: 3,
        };
        assert_eq!(
            total,
            SweepStats {
                maps: 2,
                scanned: 15,
                evicted: 2,
                refreshed: 3,
            }
        );
    }
}
