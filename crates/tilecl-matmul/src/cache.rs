use core::fmt::Display;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tilecl_runtime::HardwareContext;

use crate::components::{BlockSizes, CostModel, MatmulProblem, TilingConfig};

/// Everything the block sizes and the tiling of a problem are derived from.
#[derive(new, Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    pub problem: MatmulProblem,
    pub hardware: HardwareContext,
    pub cost_model: CostModel,
}

impl Display for PlanKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}x{}x{} {:?} on {}",
            self.problem.m, self.problem.n, self.problem.k, self.problem.elems, self.hardware
        )
    }
}

/// Memoized tiling decisions, shared by every planner of the process by default.
pub struct PlanCache {
    state: spin::RwLock<Option<HashMap<PlanKey, (BlockSizes, TilingConfig)>>>,
}

static PLAN_CACHE: PlanCache = PlanCache::new();

impl PlanCache {
    /// Create an empty cache.
    pub const fn new() -> Self {
        Self {
            state: spin::RwLock::new(None),
        }
    }

    /// The process-wide cache.
    pub fn global() -> &'static PlanCache {
        &PLAN_CACHE
    }

    /// Forget every entry.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = None;
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state.read().as_ref().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached entry of `key`, if any.
    pub fn get(&self, key: &PlanKey) -> Option<(BlockSizes, TilingConfig)> {
        self.state.read().as_ref().and_then(|map| map.get(key).copied())
    }

    /// Cached entry of `key`, computed with `init` on a miss.
    ///
    /// Errors are returned as-is and not cached.
    pub fn get_or_try_insert<E>(
        &self,
        key: &PlanKey,
        init: impl FnOnce() -> Result<(BlockSizes, TilingConfig), E>,
    ) -> Result<(BlockSizes, TilingConfig), E> {
        if let Some(entry) = self.get(key) {
            log::trace!("Plan cache hit for {key}");
            return Ok(entry);
        }

        let entry = init()?;
        log::trace!("Plan cache miss for {key}");

        let mut state = self.state.write();
        let map = state.get_or_insert_with(Default::default);
        Ok(*map.entry(key.clone()).or_insert(entry))
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{LoopOrder, MatmulElems};

    fn entry() -> (BlockSizes, TilingConfig) {
        let config = TilingConfig {
            m_split_num: 2,
            n_split_num: 1,
            m_sub_block: 1,
            n_sub_block: 1,
            k_sub_block: 1,
            num_threads: 2,
            loop_order: LoopOrder::MFirst,
        };
        (BlockSizes::new(16, 16, 16), config)
    }

    fn key(m: usize) -> PlanKey {
        PlanKey::new(
            MatmulProblem::new(m, 64, 64, MatmulElems::f32()),
            HardwareContext::new(2, 1024 * 1024),
            CostModel::default(),
        )
    }

    #[test]
    fn entries_are_computed_once() {
        let cache = PlanCache::new();
        let mut calls = 0;

        for _ in 0..3 {
            let result: Result<_, ()> = cache.get_or_try_insert(&key(64), || {
                calls += 1;
                Ok(entry())
            });
            assert_eq!(result, Ok(entry()));
        }

        assert_eq!(calls, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = PlanCache::new();

        let result = cache.get_or_try_insert(&key(32), || Err("invalid"));

        assert_eq!(result, Err("invalid"));
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_forgets_entries() {
        let cache = PlanCache::new();
        let _ = cache.get_or_try_insert::<()>(&key(64), || Ok(entry()));
        let _ = cache.get_or_try_insert::<()>(&key(128), || Ok(entry()));
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.get(&key(64)).is_none());
        assert!(cache.is_empty());
    }
}
