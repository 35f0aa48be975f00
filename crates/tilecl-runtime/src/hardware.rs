use core::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::config::GlobalConfig;

/// Capacity assumed for the L2 cache when none is configured.
pub const DEFAULT_L2_CACHE_SIZE: usize = 1024 * 1024;

/// Properties of the machine kernels are generated for.
///
/// The context is captured once and passed explicitly to every planning step, so a whole
/// generation pass sees the same values.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HardwareContext {
    num_threads: usize,
    l2_cache_size: usize,
}

impl HardwareContext {
    /// Number of worker threads, at least one.
    pub fn num_threads(&self) -> usize {
        self.num_threads.max(1)
    }

    /// Capacity of the per-core L2 cache, in bytes.
    pub fn l2_cache_size(&self) -> usize {
        self.l2_cache_size
    }

    /// Same context with a different thread count.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Same context with a different L2 capacity.
    pub fn with_l2_cache_size(mut self, l2_cache_size: usize) -> Self {
        self.l2_cache_size = l2_cache_size;
        self
    }

    /// Context of the current machine, with the overrides of the [global config](GlobalConfig)
    /// applied.
    pub fn from_global_config() -> Self {
        let config = GlobalConfig::get();
        let detected = Self::detect();

        Self {
            num_threads: config.hardware.num_threads.unwrap_or(detected.num_threads),
            l2_cache_size: config
                .hardware
                .l2_cache_size
                .unwrap_or(detected.l2_cache_size),
        }
    }

    /// Context of the current machine, ignoring any configuration.
    pub fn detect() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or_else(|err| {
                log::warn!("Can't query available parallelism, using a single thread: {err}");
                1
            });

        Self {
            num_threads,
            l2_cache_size: DEFAULT_L2_CACHE_SIZE,
        }
    }
}

impl Display for HardwareContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} threads, {} KiB L2",
            self.num_threads(),
            self.l2_cache_size / 1024
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_count_is_never_zero() {
        let hw = HardwareContext::new(0, DEFAULT_L2_CACHE_SIZE);

        assert_eq!(hw.num_threads(), 1);
        assert_eq!(hw.with_num_threads(6).num_threads(), 6);
    }

    #[test]
    fn detected_context_is_usable() {
        let hw = HardwareContext::detect();

        assert!(hw.num_threads() >= 1);
        assert_eq!(hw.l2_cache_size(), DEFAULT_L2_CACHE_SIZE);
    }
}
