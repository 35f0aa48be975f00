use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tilecl_ir::ElemType;
use tilecl_runtime::HardwareContext;

use super::MatmulProblem;

/// Extents of the output tile computed by one micro-kernel call (`m x n`), and of the reduction
/// step of one tile pair (`k`).
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSizes {
    /// Rows of a tile, called `iim`.
    pub m: usize,
    /// Columns of a tile, called `iin`.
    pub n: usize,
    /// Reduction step, called `iik`.
    pub k: usize,
}

impl Display for BlockSizes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// Problems whose `n` and `k` are both at most this size use a row block derived from the number
/// of threads.
const SMALL_PROBLEM: usize = 512;
/// Smallest row block of a small problem.
const SMALL_PROBLEM_MIN_M: usize = 4;
/// Column and reduction blocks are rounded up to a multiple of this.
const VECTOR_ALIGN: usize = 16;

/// Preferred block sizes for an element type.
pub fn default_block_sizes(elem: ElemType) -> BlockSizes {
    match elem {
        ElemType::BF16 => BlockSizes::new(32, 32, 32),
        ElemType::U8 | ElemType::S8 => BlockSizes::new(32, 64, 64),
        _ => BlockSizes::new(16, 16, 16),
    }
}

/// Smallest reduction block for an element type.
fn min_block_k(elem: ElemType) -> usize {
    match elem {
        ElemType::BF16 => 2,
        ElemType::U8 | ElemType::S8 => 4,
        _ => 1,
    }
}

/// Choose a block size close to `default` that splits `plain` into near-equal blocks.
///
/// Extents smaller than the default are covered by a single block of at least `min` elements,
/// rounded up to `align` once they reach it. Larger extents are split into
/// `ceil(plain / default)` blocks whose size is rounded up to `align`.
pub fn suggest_aligned_block(plain: usize, default: usize, min: usize, align: usize) -> usize {
    let min = min.max(1);
    let align = align.max(1);
    let default = default.max(1);

    if plain < default {
        if plain <= min {
            return min;
        }
        if plain < align {
            return plain.next_multiple_of(min);
        }
        return plain.next_multiple_of(align);
    }

    if plain % default == 0 {
        return default.next_multiple_of(align);
    }

    let num_blocks = plain.div_ceil(default);
    plain.div_ceil(num_blocks).next_multiple_of(align)
}

/// Block sizes a problem is tiled with.
///
/// Sizes forced by the problem are used as-is.
pub fn resolve_block_sizes(problem: &MatmulProblem, hw: &HardwareContext) -> BlockSizes {
    if let Some(blocks) = problem.block_sizes {
        return blocks;
    }

    let elem = problem.elems.lhs;
    let defaults = default_block_sizes(elem);

    let m = match problem.n <= SMALL_PROBLEM && problem.k <= SMALL_PROBLEM {
        true => problem
            .m
            .div_ceil(hw.num_threads())
            .min(defaults.m)
            .max(SMALL_PROBLEM_MIN_M),
        false => suggest_aligned_block(problem.m, defaults.m, 1, 1),
    };
    let n = suggest_aligned_block(problem.n, defaults.n, 1, VECTOR_ALIGN);
    let k = suggest_aligned_block(problem.k, defaults.k, min_block_k(elem), VECTOR_ALIGN);

    BlockSizes::new(m, n, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::MatmulElems;

    #[test]
    fn small_extents_use_one_block() {
        assert_eq!(suggest_aligned_block(1, 16, 1, 16), 1);
        assert_eq!(suggest_aligned_block(3, 32, 4, 16), 4);
        assert_eq!(suggest_aligned_block(6, 32, 4, 16), 8);
        assert_eq!(suggest_aligned_block(8, 16, 1, 16), 8);
        assert_eq!(suggest_aligned_block(20, 32, 1, 16), 32);
    }

    #[test]
    fn multiples_of_default_keep_it() {
        assert_eq!(suggest_aligned_block(64, 16, 1, 16), 16);
        assert_eq!(suggest_aligned_block(96, 32, 1, 1), 32);
    }

    #[test]
    fn other_extents_are_split_evenly() {
        // ceil(130 / 16) = 9 blocks of ceil(130 / 9) = 15.
        assert_eq!(suggest_aligned_block(130, 16, 1, 1), 15);
        // Same split, aligned to 16.
        assert_eq!(suggest_aligned_block(130, 16, 1, 16), 16);
        assert_eq!(suggest_aligned_block(8300, 16, 1, 16), 16);
    }

    #[test]
    fn tiny_problem_blocks() {
        let hw = HardwareContext::new(8, 1024 * 1024);
        let problem = MatmulProblem::new(8, 8, 8, MatmulElems::f32());

        assert_eq!(resolve_block_sizes(&problem, &hw), BlockSizes::new(4, 8, 8));
    }

    #[test]
    fn large_problem_blocks() {
        let hw = HardwareContext::new(8, 1024 * 1024);
        let problem = MatmulProblem::new(1024, 1024, 1024, MatmulElems::bf16());

        assert_eq!(resolve_block_sizes(&problem, &hw), BlockSizes::new(32, 32, 32));
    }

    #[test]
    fn int8_reduction_block_is_a_multiple_of_four() {
        let hw = HardwareContext::new(4, 1024 * 1024);
        let problem = MatmulProblem::new(64, 64, 3, MatmulElems::u8s8());

        assert_eq!(resolve_block_sizes(&problem, &hw).k, 4);
    }

    #[test]
    fn forced_blocks_are_kept() {
        let hw = HardwareContext::new(4, 1024 * 1024);
        let problem = MatmulProblem::new(130, 70, 8300, MatmulElems::f32())
            .with_block_sizes(BlockSizes::new(16, 16, 16));

        assert_eq!(resolve_block_sizes(&problem, &hw), BlockSizes::new(16, 16, 16));
    }
}
