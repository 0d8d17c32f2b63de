//! Single-Flight Generation
//!
//! When several callers miss on the same key at once, exactly one of them
//! (the *producer*) runs the generator; the rest (*waiters*) block on a shared
//! [`Pending`] handle and receive the producer's outcome, success or failure.
//!
//! The in-flight map is striped like a backing map. Claiming a key is a single
//! insert-if-absent under one segment lock, so there is no window in which two
//! callers can both become producers.
//!
//! A [`ProducerSlot`] releases its key when dropped. If the producer unwinds
//! before completing, waiters are released with
//! [`CacheError::GeneratorPanicked`] instead of blocking forever.

use crate::error::CacheError;
use crate::expiration::Expiration;
use crate::key::StoredKey;
use crate::operation::OperationKey;
use core::fmt;
use core::hash::BuildHasher;
use hashbrown::hash_map::Entry;
use hashbrown::{DefaultHashBuilder, HashMap};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Outcome shared between a producer and its waiters.
pub(crate) type Outcome = Result<Arc<Expiration>, CacheError>;

/// Number of segments in the in-flight map.
const FLIGHT_SEGMENTS: usize = 8;

/// A generation that has started but not finished.
pub(crate) struct Pending {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl Pending {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Publishes the outcome. Only the first call has any effect.
    fn resolve(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        self.ready.notify_all();
    }

    /// Blocks until the producer publishes, then returns a copy of the outcome.
    pub(crate) fn wait(&self) -> Outcome {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("resolved", &self.outcome.lock().is_some())
            .finish()
    }
}

/// Result of claiming a key.
pub(crate) enum Claim<'a> {
    /// The caller must generate and complete the slot.
    Producer(ProducerSlot<'a>),
    /// Another caller is generating; wait on the handle.
    Waiter(Arc<Pending>),
}

/// Keys currently being generated.
pub(crate) struct InFlight {
    segments: Box<[Mutex<HashMap<StoredKey, Arc<Pending>, DefaultHashBuilder>>]>,
    hash_builder: DefaultHashBuilder,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        let hash_builder = DefaultHashBuilder::default();
        let segments: Vec<_> = (0..FLIGHT_SEGMENTS)
            .map(|_| Mutex::new(HashMap::with_hasher(hash_builder.clone())))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            hash_builder,
        }
    }

    #[inline]
    fn segment_index(&self, key: &StoredKey) -> usize {
        (self.hash_builder.hash_one(key) as usize) % self.segments.len()
    }

    /// Atomically claims `key`: the first claimant becomes the producer.
    pub(crate) fn claim<'a>(&'a self, key: StoredKey, operation: &'a OperationKey) -> Claim<'a> {
        let idx = self.segment_index(&key);
        let mut segment = self.segments[idx].lock();
        match segment.entry(key) {
            Entry::Occupied(occupied) => Claim::Waiter(Arc::clone(occupied.get())),
            Entry::Vacant(vacant) => {
                let key = vacant.key().clone();
                let pending = Arc::new(Pending::new());
                vacant.insert(Arc::clone(&pending));
                Claim::Producer(ProducerSlot {
                    flights: self,
                    key,
                    pending,
                    operation,
                    completed: false,
                })
            }
        }
    }

    /// Returns `true` while `key` is being generated.
    pub(crate) fn is_pending(&self, key: &StoredKey) -> bool {
        self.segments[self.segment_index(key)]
            .lock()
            .contains_key(key)
    }

    /// Number of generations in progress.
    pub(crate) fn len(&self) -> usize {
        self.segments.iter().map(|s| s.lock().len()).sum()
    }

    fn release(&self, key: &StoredKey, pending: &Arc<Pending>) {
        let mut segment = self.segments[self.segment_index(key)].lock();
        if segment.get(key).is_some_and(|p| Arc::ptr_eq(p, pending)) {
            segment.remove(key);
        }
    }
}

impl fmt::Debug for InFlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlight")
            .field("segment_count", &self.segments.len())
            .field("pending", &self.len())
            .finish()
    }
}

/// Exclusive right to generate one key.
pub(crate) struct ProducerSlot<'a> {
    flights: &'a InFlight,
    key: StoredKey,
    pending: Arc<Pending>,
    operation: &'a OperationKey,
    completed: bool,
}

impl ProducerSlot<'_> {
    /// The canonical key being generated.
    pub(crate) fn key(&self) -> &StoredKey {
        &self.key
    }

    /// Publishes `outcome` to every waiter and releases the key.
    ///
    /// Callers store a successful entry in the backing map before completing,
    /// so anyone who misses the handle already finds the value there.
    pub(crate) fn complete(mut self, outcome: Outcome) -> Outcome {
        self.pending.resolve(outcome.clone());
        self.completed = true;
        outcome
    }
}

impl Drop for ProducerSlot<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.pending.resolve(Err(CacheError::GeneratorPanicked {
                operation: self.operation.clone(),
            }));
        }
        self.flights.release(&self.key, &self.pending);
    }
}
