use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tilecl_runtime::HardwareContext;

use super::{balance211, ResolvedProblem};

/// Order of the two tile loops inside a sub-block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoopOrder {
    /// Rows outer, columns inner.
    #[default]
    MFirst,
    /// Columns outer, rows inner.
    NFirst,
}

/// Tunables of the tiling search.
///
/// The values are empirical. Changing them changes which configuration is picked, never the
/// structure of the search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CostModel {
    /// Constant added to the shape term of the split cost, so the shape of the per-core problem
    /// matters less than core usage on small problems.
    pub shape_bias: usize,
    /// Cost of every additional split of the N axis, in micro-kernel calls.
    pub split_penalty: usize,
    /// Int8 problems with N and K at most this size are only split along M.
    pub int8_small_threshold: usize,
    /// Problems with N and K at most this size are only split along M.
    pub small_threshold: usize,
    /// Problems with K at least this size move threads from M or N to K.
    pub large_k_threshold: usize,
    /// When M < N, the M split is only reduced if N / M is below this ratio.
    pub large_k_aspect_ratio: usize,
    /// Bytes of lhs reduction chunk per sub-block when the worker tile fits in L2.
    pub k_chunk_bytes_fit: usize,
    /// Bytes of lhs reduction chunk per sub-block otherwise.
    pub k_chunk_bytes_spill: usize,
    /// Tile loop order of generated kernels.
    pub loop_order: LoopOrder,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            shape_bias: 1024,
            split_penalty: 8,
            int8_small_threshold: 512,
            small_threshold: 192,
            large_k_threshold: 8192,
            large_k_aspect_ratio: 3,
            k_chunk_bytes_fit: 2048,
            k_chunk_bytes_spill: 4096,
            loop_order: LoopOrder::MFirst,
        }
    }
}

/// Distribution of a matmul over threads and cache sub-blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilingConfig {
    /// Number of thread teams along M.
    pub m_split_num: usize,
    /// Number of thread teams along N.
    pub n_split_num: usize,
    /// Number of sub-blocks a team splits its rows into.
    pub m_sub_block: usize,
    /// Number of sub-blocks a team splits its columns into.
    pub n_sub_block: usize,
    /// Number of chunks a worker splits its reduction range into.
    pub k_sub_block: usize,
    /// Total number of threads the configuration was selected for.
    pub num_threads: usize,
    pub loop_order: LoopOrder,
}

impl TilingConfig {
    /// Number of thread teams along K, the threads left once M and N are split.
    pub fn k_split_num(&self) -> usize {
        (self.num_threads / (self.m_split_num * self.n_split_num).max(1)).max(1)
    }
}

impl Display for TilingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "split {}x{}x{} sub-blocks {}x{}x{} {:?}",
            self.m_split_num,
            self.n_split_num,
            self.k_split_num(),
            self.m_sub_block,
            self.n_sub_block,
            self.k_sub_block,
            self.loop_order
        )
    }
}

/// Divisors of `x`, in increasing order.
pub(crate) fn divisors(x: usize) -> Vec<usize> {
    (1..=x).filter(|i| x % i == 0).collect()
}

/// Select the thread split and the cache sub-blocks of a problem.
///
/// Pure function of its inputs: the same problem on the same hardware always yields the same
/// configuration.
pub fn select_tiling(
    problem: &ResolvedProblem,
    hw: &HardwareContext,
    cost_model: &CostModel,
) -> TilingConfig {
    let threads = hw.num_threads();
    let (m_split_num, n_split_num) = select_split(problem, threads, cost_model);

    let mut config = TilingConfig {
        m_split_num,
        n_split_num,
        m_sub_block: 1,
        n_sub_block: 1,
        k_sub_block: 1,
        num_threads: threads,
        loop_order: cost_model.loop_order,
    };
    select_sub_blocks(problem, hw, cost_model, &mut config);

    log::debug!(
        "Selected tiling for {}x{}x{} on {hw}: {config}",
        problem.m,
        problem.n,
        problem.k
    );

    config
}

fn select_split(
    problem: &ResolvedProblem,
    threads: usize,
    cost_model: &CostModel,
) -> (usize, usize) {
    let (m, n, k) = (problem.m, problem.n, problem.k);
    let blocks = problem.blocks;
    let m_blocks = problem.m_blocks();
    let n_blocks = problem.n_blocks();

    let mut cost = usize::MAX;
    let mut split_n = 1;

    for i in 1..=threads {
        let num_m_block = m_blocks.div_ceil(threads / i);
        let num_n_block = n_blocks.div_ceil(i);
        let num_brgemm = num_m_block * num_n_block;
        let num_core = i.min(n_blocks) * (threads / i).min(m_blocks);

        let new_cost = (cost_model.shape_bias + m * i / threads + n / i)
            * (num_brgemm + cost_model.split_penalty * i)
            / num_core.max(1);

        if new_cost < cost {
            split_n = i;
            cost = new_cost;
        }
    }

    let mut m_split_num = threads / split_n;
    let mut n_split_num = split_n;

    let small = |threshold: usize| n <= threshold && k <= threshold;

    if problem.elems().lhs.is_int8() && small(cost_model.int8_small_threshold) {
        m_split_num = threads;
        n_split_num = 1;
    } else if small(cost_model.small_threshold) {
        m_split_num = threads;
        n_split_num = 1;
    } else if k >= cost_model.large_k_threshold {
        // Move threads to K, taking them from the smaller of M and N.
        if m < n {
            let possible_splits = divisors(m_split_num);
            if possible_splits.len() > 2 && n / m < cost_model.large_k_aspect_ratio {
                m_split_num /= possible_splits[1];
            } else if let Some(&k_split_num) = divisors(threads).get(1) {
                m_split_num = 1;
                n_split_num = threads / k_split_num;
            }
        } else {
            let possible_splits = divisors(n_split_num);
            if possible_splits.len() > 2 {
                n_split_num /= possible_splits[1];
            } else if let Some(&divisor) = divisors(m_split_num).get(1) {
                m_split_num /= divisor;
            }
        }
    }

    log::trace!(
        "Split {m_split_num}x{n_split_num} for {m}x{n}x{k} with blocks {blocks} on {threads} threads"
    );

    (m_split_num, n_split_num)
}

fn select_sub_blocks(
    problem: &ResolvedProblem,
    hw: &HardwareContext,
    cost_model: &CostModel,
    config: &mut TilingConfig,
) {
    let blocks = problem.blocks;
    let elems = problem.elems();
    let dtype_a = elems.lhs.size();
    let dtype_c = elems.out.size();
    let l2_size = hw.l2_cache_size();
    let k_split_num = config.k_split_num();

    let single_m = problem.m_blocks().div_ceil(config.m_split_num) * blocks.m;
    let single_n = problem.n_blocks().div_ceil(config.n_split_num) * blocks.n;
    let single_k = problem.k_blocks().div_ceil(k_split_num) * blocks.k;

    let k_chunk_bytes = match single_m * single_n * dtype_a < l2_size {
        true => cost_model.k_chunk_bytes_fit,
        false => cost_model.k_chunk_bytes_spill,
    };
    let single_k_threshold = (k_chunk_bytes / dtype_a).max(1);

    let l2_mn = if single_k >= single_k_threshold {
        config.k_sub_block = single_k.div_ceil(single_k_threshold);
        let l2_k = single_k.div_ceil(blocks.k).div_ceil(config.k_sub_block) * blocks.k;

        // a*M*K + a*N*K + c*M*N <= L2 with M == N, solved for M.
        let ak2 = (2 * dtype_a * l2_k) as f64;
        let c = dtype_c as f64;
        ((ak2 * ak2 + 4.0 * c * l2_size as f64).sqrt() - ak2) / (2.0 * c)
    } else {
        config.k_sub_block = 1;

        // a*M*K + a*N*K <= L2 with M == N.
        (l2_size / (2 * dtype_a * single_k)) as f64
    };
    let l2_mn = (l2_mn as usize).max(1);

    config.m_sub_block = (single_m / l2_mn).max(1);
    config.n_sub_block = (single_n / l2_mn).max(1);

    // A worker never gets fewer blocks than the smaller share of its axis.
    let smallest_share = |blocks: usize, split: usize| {
        let split = split.min(blocks).max(1);
        balance211(blocks, split, split - 1).len.max(1)
    };
    config.m_sub_block = config
        .m_sub_block
        .min(smallest_share(problem.m_blocks(), config.m_split_num));
    config.n_sub_block = config
        .n_sub_block
        .min(smallest_share(problem.n_blocks(), config.n_split_num));
    config.k_sub_block = config
        .k_sub_block
        .min(smallest_share(problem.k_blocks(), k_split_num));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{BlockSizes, MatmulElems, MatmulProblem, MatrixLayout};

    fn resolved(m: usize, n: usize, k: usize, blocks: BlockSizes) -> ResolvedProblem {
        ResolvedProblem::new(MatmulProblem::new(m, n, k, MatmulElems::f32()), blocks).unwrap()
    }

    #[test]
    fn divisors_are_sorted() {
        assert_eq!(divisors(12), vec![1, 2, 3, 4, 6, 12]);
        assert_eq!(divisors(1), vec![1]);
    }

    #[test]
    fn small_problem_splits_rows_only() {
        let hw = HardwareContext::new(8, 1024 * 1024);
        let problem = resolved(8, 8, 8, BlockSizes::new(4, 8, 8));
        let config = select_tiling(&problem, &hw, &CostModel::default());

        assert_eq!((config.m_split_num, config.n_split_num), (8, 1));
        assert_eq!(config.k_split_num(), 1);
        assert_eq!(
            (config.m_sub_block, config.n_sub_block, config.k_sub_block),
            (1, 1, 1)
        );
    }

    #[test]
    fn large_k_moves_threads_to_k() {
        let hw = HardwareContext::new(4, 1024 * 1024);
        let problem = resolved(130, 70, 8300, BlockSizes::new(16, 16, 16));
        let config = select_tiling(&problem, &hw, &CostModel::default());

        assert_eq!((config.m_split_num, config.n_split_num), (2, 1));
        assert_eq!(config.k_split_num(), 2);
        assert_eq!(config.k_sub_block, 9);
        assert_eq!((config.m_sub_block, config.n_sub_block), (1, 1));
    }

    #[test]
    fn large_k_with_wide_output_splits_n() {
        let hw = HardwareContext::new(8, 1024 * 1024);
        let problem = resolved(64, 1024, 8192, BlockSizes::new(16, 16, 16));
        let config = select_tiling(&problem, &hw, &CostModel::default());

        assert!(config.k_split_num() > 1);
        assert!(config.m_split_num * config.n_split_num * config.k_split_num() <= 8);
    }

    #[test]
    fn single_thread_never_splits() {
        let hw = HardwareContext::new(1, 1024 * 1024);

        for (m, n, k) in [(8, 8, 8), (300, 700, 9000), (1000, 100, 9000)] {
            let problem = resolved(m, n, k, BlockSizes::new(16, 16, 16));
            let config = select_tiling(&problem, &hw, &CostModel::default());

            assert_eq!(
                (config.m_split_num, config.n_split_num, config.k_split_num()),
                (1, 1, 1)
            );
        }
    }

    #[test]
    fn int8_small_problem_splits_rows_only() {
        let hw = HardwareContext::new(4, 1024 * 1024);
        let problem = MatmulProblem::new(256, 512, 512, MatmulElems::u8s8()).with_layouts(
            MatrixLayout::Plain,
            MatrixLayout::Blocked,
            MatrixLayout::Plain,
        );
        let resolved = ResolvedProblem::new(problem, BlockSizes::new(32, 64, 64)).unwrap();
        let config = select_tiling(&resolved, &hw, &CostModel::default());

        assert_eq!((config.m_split_num, config.n_split_num), (4, 1));
    }

    #[test]
    fn small_cache_creates_sub_blocks() {
        let hw = HardwareContext::new(1, 32 * 1024);
        let problem = resolved(512, 512, 1024, BlockSizes::new(16, 16, 16));
        let config = select_tiling(&problem, &hw, &CostModel::default());

        assert!(config.m_sub_block > 1);
        assert!(config.n_sub_block > 1);
        assert!(config.m_sub_block <= 32 && config.n_sub_block <= 32);
    }

    #[test]
    fn loop_order_comes_from_the_cost_model() {
        let hw = HardwareContext::new(2, 1024 * 1024);
        let problem = resolved(64, 64, 64, BlockSizes::new(16, 16, 16));
        let cost_model = CostModel {
            loop_order: LoopOrder::NFirst,
            ..Default::default()
        };

        assert_eq!(
            select_tiling(&problem, &hw, &cost_model).loop_order,
            LoopOrder::NFirst
        );
    }
}
