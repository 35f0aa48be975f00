use crate::{AnchorId, ElemType, Expr, LoopId, TensorId, VarId};

/// Ordered list of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    /// Statements executed in order.
    pub stmts: Vec<Stmt>,
}

/// A statement of the loop-nest IR.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Define a variable.
    Let {
        /// Variable being defined.
        var: VarId,
        /// Value bound to the variable.
        value: Expr,
    },
    /// Counted loop.
    For(ForLoop),
    /// Conditional block.
    If {
        /// Condition, considered true when non-zero.
        cond: Expr,
        /// Block executed when the condition holds.
        then: Block,
        /// Block executed otherwise.
        or_else: Option<Block>,
    },
    /// Batch-reduce GEMM micro-kernel invocation.
    Brgemm(BrgemmCall),
    /// Fill `len` contiguous elements with zeros.
    MemZero {
        /// First element written.
        dst: TensorPtr,
        /// Number of elements.
        len: Expr,
    },
    /// Element-wise `dst += src` over `len` contiguous elements.
    Accumulate {
        /// First element updated.
        dst: TensorPtr,
        /// First element read.
        src: TensorPtr,
        /// Number of elements.
        len: Expr,
    },
    /// Mark an output region as ready for consumers.
    Anchor(AnchorId),
    /// Free text kept in the printed IR.
    Comment(String),
}

/// Counted loop from `start` (inclusive) to `end` (exclusive) with a unit step.
#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    /// Handle of the loop in the kernel loop arena.
    pub id: LoopId,
    /// Induction variable.
    pub var: VarId,
    /// First value of the induction variable.
    pub start: Expr,
    /// Bound of the induction variable.
    pub end: Expr,
    /// Scheduling of the iterations.
    pub kind: LoopKind,
    /// Loop body.
    pub body: Block,
}

/// How the iterations of a loop are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// Iterations run one after the other on the current worker.
    Serial,
    /// Iterations are distributed over a team of workers.
    ///
    /// All iterations complete before the statement following the loop starts.
    Parallel {
        /// Requested team size.
        num_threads: usize,
    },
}

impl LoopKind {
    /// Whether iterations may run concurrently.
    pub fn is_parallel(&self) -> bool {
        matches!(self, LoopKind::Parallel { .. })
    }
}

/// Address of an element of a tensor.
#[derive(new, Debug, Clone, PartialEq)]
pub struct TensorPtr {
    /// Tensor being addressed.
    pub tensor: TensorId,
    /// One index per tensor dimension.
    pub index: Vec<Expr>,
}

/// Whether a micro-kernel call overwrites or accumulates into its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrgemmMode {
    /// `C = sum(A_i * B_i)`
    Init,
    /// `C += sum(A_i * B_i)`
    Update,
}

/// Batch-reduce GEMM call: `C (+)= sum over i < batch of A_i * B_i`.
///
/// `A_i` starts `i * stride_a` elements after `a`, and `B_i` starts `i * stride_b` elements after
/// `b`. Each product is `m x k` by `k x n`.
#[derive(Debug, Clone, PartialEq)]
pub struct BrgemmCall {
    /// First element of the first lhs tile.
    pub a: TensorPtr,
    /// First element of the first rhs tile.
    pub b: TensorPtr,
    /// First element of the output tile.
    pub c: TensorPtr,
    /// Number of tile pairs reduced.
    pub batch: Expr,
    /// Rows of the output tile.
    pub m: usize,
    /// Columns of the output tile.
    pub n: usize,
    /// Reduction extent of one tile pair.
    pub k: usize,
    /// Leading dimension of the lhs tiles.
    pub lda: usize,
    /// Leading dimension of the rhs tiles, counted in packed rows.
    pub ldb: usize,
    /// Leading dimension of the output tile.
    pub ldc: usize,
    /// Distance between two consecutive lhs tiles.
    pub stride_a: usize,
    /// Distance between two consecutive rhs tiles.
    pub stride_b: usize,
    /// Element type of the lhs operand.
    pub a_elem: ElemType,
    /// Element type of the rhs operand.
    pub b_elem: ElemType,
    /// Number of consecutive reduction elements interleaved in the rhs tiles.
    pub b_pack: usize,
    /// Overwrite or accumulate.
    pub mode: BrgemmMode,
}

impl Block {
    /// Visit every statement of the block in program order, nested statements included.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Stmt)) {
        for stmt in self.stmts.iter() {
            visit(stmt);
            match stmt {
                Stmt::For(for_loop) => for_loop.body.walk(visit),
                Stmt::If { then, or_else, .. } => {
                    then.walk(visit);
                    if let Some(or_else) = or_else {
                        or_else.walk(visit);
                    }
                }
                _ => {}
            }
        }
    }
}
