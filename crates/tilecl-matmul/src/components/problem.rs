use serde::{Deserialize, Serialize};
use tilecl_ir::ElemType;

use super::{
    error::{MatmulSetupError, MatmulUnsupportedError},
    BlockSizes,
};

/// Memory layout of a matrix operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixLayout {
    /// Row-major matrix: `[M, K]`, `[K, N]` or `[M, N]`.
    Plain,
    /// Matrix stored as a grid of contiguous tiles, each tile being row-major.
    ///
    /// The rhs operand is stored column of tiles first (`[N/iin, K/iik, iik, iin]`), so the tiles
    /// reduced together by one micro-kernel call are contiguous.
    Blocked,
}

/// Element types of the three tensors of a matmul.
#[derive(new, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulElems {
    /// Lhs element type.
    pub lhs: ElemType,
    /// Rhs element type.
    pub rhs: ElemType,
    /// Output element type.
    pub out: ElemType,
}

impl MatmulElems {
    /// `f32 x f32 -> f32`
    pub fn f32() -> Self {
        Self::new(ElemType::F32, ElemType::F32, ElemType::F32)
    }

    /// `bf16 x bf16 -> f32`
    pub fn bf16() -> Self {
        Self::new(ElemType::BF16, ElemType::BF16, ElemType::F32)
    }

    /// `u8 x s8 -> s32`
    pub fn u8s8() -> Self {
        Self::new(ElemType::U8, ElemType::S8, ElemType::S32)
    }

    /// `s8 x s8 -> s32`
    pub fn s8s8() -> Self {
        Self::new(ElemType::S8, ElemType::S8, ElemType::S32)
    }

    /// Type partial sums are accumulated in.
    pub fn accumulator(&self) -> ElemType {
        self.lhs.accumulator()
    }

    /// Number of consecutive reduction elements interleaved in a packed rhs tile.
    pub fn dtype_block(&self) -> usize {
        match self.rhs {
            ElemType::BF16 => 2,
            ElemType::U8 | ElemType::S8 => 4,
            _ => 1,
        }
    }

    /// Whether the micro-kernel supports the combination.
    pub fn is_supported(&self) -> bool {
        matches!(
            (self.lhs, self.rhs, self.out),
            (ElemType::F32, ElemType::F32, ElemType::F32)
                | (ElemType::BF16, ElemType::BF16, ElemType::F32)
                | (ElemType::U8 | ElemType::S8, ElemType::S8, ElemType::S32)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Description of a matmul problem to solve, regardless of actual data
pub struct MatmulProblem {
    /// Rows of the lhs and output.
    pub m: usize,
    /// Columns of the rhs and output.
    pub n: usize,
    /// Shared reduction extent.
    pub k: usize,
    /// Element types.
    pub elems: MatmulElems,
    /// Layout of the lhs.
    pub lhs_layout: MatrixLayout,
    /// Layout of the rhs.
    pub rhs_layout: MatrixLayout,
    /// Layout of the output.
    pub out_layout: MatrixLayout,
    /// Block sizes forced by the caller instead of being derived from the shape.
    pub block_sizes: Option<BlockSizes>,
}

impl MatmulProblem {
    /// Problem with plain operands and derived block sizes.
    pub fn new(m: usize, n: usize, k: usize, elems: MatmulElems) -> Self {
        Self {
            m,
            n,
            k,
            elems,
            lhs_layout: MatrixLayout::Plain,
            rhs_layout: MatrixLayout::Plain,
            out_layout: MatrixLayout::Plain,
            block_sizes: None,
        }
    }

    /// Same problem with different operand layouts.
    pub fn with_layouts(mut self, lhs: MatrixLayout, rhs: MatrixLayout, out: MatrixLayout) -> Self {
        self.lhs_layout = lhs;
        self.rhs_layout = rhs;
        self.out_layout = out;
        self
    }

    /// Same problem with forced block sizes.
    pub fn with_block_sizes(mut self, block_sizes: BlockSizes) -> Self {
        self.block_sizes = Some(block_sizes);
        self
    }

    /// Number of floating point operations, in billions.
    pub fn gflop(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64 / 1e9
    }

    /// Reject problems no kernel can be generated for.
    pub fn validate(&self) -> Result<(), MatmulSetupError> {
        if self.m == 0 || self.n == 0 || self.k == 0 {
            return Err(MatmulSetupError::EmptyProblem {
                m: self.m,
                n: self.n,
                k: self.k,
            });
        }

        if !self.elems.is_supported() {
            return Err(MatmulUnsupportedError::ElemTypes {
                lhs: self.elems.lhs,
                rhs: self.elems.rhs,
                out: self.elems.out,
            }
            .into());
        }

        // Packed rhs tiles only exist in the blocked layout.
        let dtype_block = self.elems.dtype_block();
        if dtype_block > 1 && self.rhs_layout == MatrixLayout::Plain {
            return Err(MatmulUnsupportedError::RhsLayout {
                rhs: self.elems.rhs,
                layout: self.rhs_layout,
            }
            .into());
        }

        if let Some(blocks) = &self.block_sizes {
            if blocks.m == 0 || blocks.n == 0 || blocks.k == 0 {
                return Err(MatmulSetupError::InvalidConfig(Box::new(format!(
                    "Block sizes must be positive, got {blocks}"
                ))));
            }
            if blocks.k % dtype_block != 0 {
                return Err(MatmulUnsupportedError::PackingFactor {
                    block_k: blocks.k,
                    dtype_block,
                }
                .into());
            }
        }

        Ok(())
    }
}

/// A validated problem together with the block sizes it is tiled with.
///
/// Extents are padded to a multiple of their block size: every tensor of the generated kernel
/// uses the padded extents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedProblem {
    /// Problem as described by the caller.
    pub problem: MatmulProblem,
    /// Tile granularity on every axis.
    pub blocks: BlockSizes,
    /// Rows, rounded up to a multiple of `blocks.m`.
    pub m: usize,
    /// Columns, rounded up to a multiple of `blocks.n`.
    pub n: usize,
    /// Reduction extent, rounded up to a multiple of `blocks.k`.
    pub k: usize,
}

impl ResolvedProblem {
    /// Validate the problem and pad its extents to the block sizes.
    pub fn new(problem: MatmulProblem, blocks: BlockSizes) -> Result<Self, MatmulSetupError> {
        problem.validate()?;

        if blocks.m == 0 || blocks.n == 0 || blocks.k == 0 {
            return Err(MatmulSetupError::InvalidConfig(Box::new(format!(
                "Block sizes must be positive, got {blocks}"
            ))));
        }

        let dtype_block = problem.elems.dtype_block();
        if blocks.k % dtype_block != 0 {
            return Err(MatmulUnsupportedError::PackingFactor {
                block_k: blocks.k,
                dtype_block,
            }
            .into());
        }

        Ok(Self {
            m: problem.m.next_multiple_of(blocks.m),
            n: problem.n.next_multiple_of(blocks.n),
            k: problem.k.next_multiple_of(blocks.k),
            problem,
            blocks,
        })
    }

    /// Number of blocks along M.
    pub fn m_blocks(&self) -> usize {
        self.m / self.blocks.m
    }

    /// Number of blocks along N.
    pub fn n_blocks(&self) -> usize {
        self.n / self.blocks.n
    }

    /// Number of blocks along K.
    pub fn k_blocks(&self) -> usize {
        self.k / self.blocks.k
    }

    /// Element types.
    pub fn elems(&self) -> MatmulElems {
        self.problem.elems
    }

    /// Rhs packing factor.
    pub fn dtype_block(&self) -> usize {
        self.problem.elems.dtype_block()
    }
}
