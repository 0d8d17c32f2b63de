//! Registry Configuration
//!
//! [`RegistryConfig`] has public fields for simple instantiation; start from
//! [`RegistryConfig::default`] and override what you need.
//!
//! | Field | Default | Meaning |
//! |-------|---------|---------|
//! | `sweep_interval` | 60 s | Pause between the end of one sweep pass and the start of the next |
//! | `workers` | available parallelism | Background worker threads |
//! | `queue_capacity` | `workers * 4` | Queued background jobs before callers run jobs inline |
//! | `segments` | 16 | Segments in the registry's default backing map |
//!
//! # Examples
//!
//! ```
//! use memo_cache::config::RegistryConfig;
//! use memo_cache::CacheRegistry;
//! use std::time::Duration;
//!
//! let config = RegistryConfig {
//!     sweep_interval: Duration::from_secs(5),
//!     workers: 2,
//!     ..RegistryConfig::default()
//! };
//! let registry = CacheRegistry::init(config);
//! assert_eq!(registry.sweep_interval(), Duration::from_secs(5));
//! ```

use crate::backing::DEFAULT_SEGMENTS;
use core::fmt;
use core::time::Duration;

/// Default pause between sweep passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Configuration for a [`CacheRegistry`](crate::CacheRegistry).
///
/// # Fields
///
/// - `sweep_interval`: delay before each sweep pass. The next pass is only
///   scheduled once the current one has finished, so passes never overlap.
/// - `workers`: threads serving eager refreshes, drains and sweep fan-out.
/// - `queue_capacity`: bound on queued background jobs. When full, the
///   submitting thread runs the job itself.
/// - `segments`: lock stripes in the default backing map.
#[derive(Clone, Copy)]
pub struct RegistryConfig {
    /// Delay between sweep passes.
    pub sweep_interval: Duration,
    /// Number of background worker threads.
    pub workers: usize,
    /// Maximum number of queued background jobs.
    pub queue_capacity: usize,
    /// Number of segments in the default backing map.
    pub segments: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let workers = default_workers();
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            workers,
            queue_capacity: workers * 4,
            segments: DEFAULT_SEGMENTS,
        }
    }
}

impl fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("sweep_interval", &self.sweep_interval)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("segments", &self.segments)
            .finish()
    }
}
