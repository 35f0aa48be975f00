use tilecl_ir::{Expr, TensorId, TensorPtr};

use crate::components::{BlockSizes, MatrixLayout, ResolvedProblem};

/// Shapes and addressing of the three operands of a generated kernel.
///
/// All coordinates are element coordinates on the padded `M x N x K` problem, aligned on block
/// boundaries.
#[derive(Debug, Clone, Copy)]
pub struct MatmulLayout {
    pub lhs: MatrixLayout,
    pub rhs: MatrixLayout,
    pub out: MatrixLayout,
    pub blocks: BlockSizes,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    /// Rhs packing factor.
    pub dtype_block: usize,
}

impl MatmulLayout {
    pub fn new(problem: &ResolvedProblem) -> Self {
        Self {
            lhs: problem.problem.lhs_layout,
            rhs: problem.problem.rhs_layout,
            out: problem.problem.out_layout,
            blocks: problem.blocks,
            m: problem.m,
            n: problem.n,
            k: problem.k,
            dtype_block: problem.dtype_block(),
        }
    }

    pub fn lhs_shape(&self) -> Vec<usize> {
        let BlockSizes { m: iim, k: iik, .. } = self.blocks;

        match self.lhs {
            MatrixLayout::Plain => vec![self.m, self.k],
            MatrixLayout::Blocked => vec![self.m / iim, self.k / iik, iim, iik],
        }
    }

    pub fn rhs_shape(&self) -> Vec<usize> {
        let BlockSizes { n: iin, k: iik, .. } = self.blocks;

        match (self.rhs, self.dtype_block) {
            (MatrixLayout::Plain, _) => vec![self.k, self.n],
            (MatrixLayout::Blocked, 1) => vec![self.n / iin, self.k / iik, iik, iin],
            (MatrixLayout::Blocked, db) => {
                vec![self.n / iin, self.k / iik, iik / db, iin, db]
            }
        }
    }

    pub fn out_shape(&self) -> Vec<usize> {
        let BlockSizes { m: iim, n: iin, .. } = self.blocks;

        match self.out {
            MatrixLayout::Plain => vec![self.m, self.n],
            MatrixLayout::Blocked => vec![self.m / iim, self.n / iin, iim, iin],
        }
    }

    /// Shape of the partial sums buffer: one output per reduction team.
    pub fn partial_shape(&self, k_split: usize) -> Vec<usize> {
        let mut shape = vec![k_split];
        shape.extend(self.out_shape());
        shape
    }

    /// First element of the lhs tile at `(m, k)`.
    pub fn lhs_ptr(&self, tensor: TensorId, m: &Expr, k: &Expr) -> TensorPtr {
        let BlockSizes { m: iim, k: iik, .. } = self.blocks;

        let index = match self.lhs {
            MatrixLayout::Plain => vec![m.clone(), k.clone()],
            MatrixLayout::Blocked => vec![m / iim, k / iik, 0.into(), 0.into()],
        };
        TensorPtr::new(tensor, index)
    }

    /// First element of the rhs tile at `(k, n)`.
    pub fn rhs_ptr(&self, tensor: TensorId, k: &Expr, n: &Expr) -> TensorPtr {
        let BlockSizes { n: iin, k: iik, .. } = self.blocks;

        let mut index = match self.rhs {
            MatrixLayout::Plain => vec![k.clone(), n.clone()],
            MatrixLayout::Blocked => vec![n / iin, k / iik, 0.into(), 0.into()],
        };
        if self.rhs == MatrixLayout::Blocked && self.dtype_block > 1 {
            index.push(0.into());
        }
        TensorPtr::new(tensor, index)
    }

    /// First element of the output tile at `(m, n)`, in the slice `partial` of the partial sums
    /// buffer when provided.
    pub fn out_ptr(
        &self,
        tensor: TensorId,
        partial: Option<&Expr>,
        m: &Expr,
        n: &Expr,
    ) -> TensorPtr {
        let BlockSizes { m: iim, n: iin, .. } = self.blocks;

        let mut index = Vec::with_capacity(5);
        if let Some(slice) = partial {
            index.push(slice.clone());
        }
        match self.out {
            MatrixLayout::Plain => index.extend([m.clone(), n.clone()]),
            MatrixLayout::Blocked => index.extend([m / iim, n / iin, 0.into(), 0.into()]),
        }
        TensorPtr::new(tensor, index)
    }

    pub fn lda(&self) -> usize {
        match self.lhs {
            MatrixLayout::Plain => self.k,
            MatrixLayout::Blocked => self.blocks.k,
        }
    }

    pub fn ldb(&self) -> usize {
        match self.rhs {
            MatrixLayout::Plain => self.n,
            MatrixLayout::Blocked => self.blocks.n,
        }
    }

    pub fn ldc(&self) -> usize {
        match self.out {
            MatrixLayout::Plain => self.n,
            MatrixLayout::Blocked => self.blocks.n,
        }
    }

    /// Distance between two lhs tiles consecutive along K.
    pub fn stride_a(&self) -> usize {
        match self.lhs {
            MatrixLayout::Plain => self.blocks.k,
            MatrixLayout::Blocked => self.blocks.m * self.blocks.k,
        }
    }

    /// Distance between two rhs tiles consecutive along K.
    pub fn stride_b(&self) -> usize {
        match self.rhs {
            MatrixLayout::Plain => self.blocks.k * self.n,
            MatrixLayout::Blocked => self.blocks.k * self.blocks.n,
        }
    }
}
