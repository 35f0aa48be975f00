use tilecl_ir::BrgemmMode;

use crate::SharedBuffer;

/// Resolved operands of one batch-reduce GEMM call.
///
/// Computes `C (+)= sum over i < batch of A_i * B_i`, where `A_i` is the `m x k` tile starting
/// `i * stride_a` elements after `a_offset` with rows `lda` elements apart, and `B_i` is the
/// `k x n` tile starting `i * stride_b` elements after `b_offset`. Rhs tiles interleave `b_pack`
/// consecutive reduction elements: element `(kk, nn)` is stored at
/// `(kk / b_pack) * ldb * b_pack + nn * b_pack + kk % b_pack`.
#[derive(Debug, Clone, Copy)]
pub struct BrgemmArgs<'a> {
    /// Lhs storage.
    pub a: &'a SharedBuffer,
    /// First element of the first lhs tile.
    pub a_offset: usize,
    /// Rhs storage.
    pub b: &'a SharedBuffer,
    /// First element of the first rhs tile.
    pub b_offset: usize,
    /// Output storage.
    pub c: &'a SharedBuffer,
    /// First element of the output tile.
    pub c_offset: usize,
    /// Number of tile pairs.
    pub batch: usize,
    /// Rows of the output tile.
    pub m: usize,
    /// Columns of the output tile.
    pub n: usize,
    /// Reduction extent of one tile pair.
    pub k: usize,
    /// Leading dimension of the lhs tiles.
    pub lda: usize,
    /// Leading dimension of the rhs tiles.
    pub ldb: usize,
    /// Leading dimension of the output tile.
    pub ldc: usize,
    /// Distance between two lhs tiles.
    pub stride_a: usize,
    /// Distance between two rhs tiles.
    pub stride_b: usize,
    /// Rhs packing factor.
    pub b_pack: usize,
    /// Overwrite or accumulate.
    pub mode: BrgemmMode,
}

impl BrgemmArgs<'_> {
    /// Position of lhs element `(mm, kk)` of tile `i`, relative to `a_offset`.
    pub fn a_index(&self, i: usize, mm: usize, kk: usize) -> usize {
        i * self.stride_a + mm * self.lda + kk
    }

    /// Position of rhs element `(kk, nn)` of tile `i`, relative to `b_offset`.
    pub fn b_index(&self, i: usize, kk: usize, nn: usize) -> usize {
        let pack = self.b_pack.max(1);
        i * self.stride_b + (kk / pack) * self.ldb * pack + nn * pack + kk % pack
    }

    /// Position of output element `(mm, nn)`, relative to `c_offset`.
    pub fn c_index(&self, mm: usize, nn: usize) -> usize {
        mm * self.ldc + nn
    }

    /// Number of lhs elements spanned from `a_offset`, zero when nothing is read.
    pub fn a_extent(&self) -> usize {
        match self.is_empty() {
            true => 0,
            false => self.a_index(self.batch - 1, self.m - 1, self.k - 1) + 1,
        }
    }

    /// Number of rhs elements spanned from `b_offset`, zero when nothing is read.
    pub fn b_extent(&self) -> usize {
        if self.is_empty() {
            return 0;
        }

        // The last reduction row is not always the farthest element of a packed tile.
        let last = self.batch - 1;
        (self.k.saturating_sub(self.b_pack.max(1))..self.k)
            .map(|kk| self.b_index(last, kk, self.n - 1) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Number of output elements spanned from `c_offset`.
    pub fn c_extent(&self) -> usize {
        match self.m == 0 || self.n == 0 {
            true => 0,
            false => self.c_index(self.m - 1, self.n - 1) + 1,
        }
    }

    fn is_empty(&self) -> bool {
        self.batch == 0 || self.m == 0 || self.n == 0 || self.k == 0
    }
}

/// Innermost dense compute routine invoked by generated kernels.
///
/// Implementations may assume every element addressed by the arguments is in bounds.
pub trait MicroKernel: Send + Sync {
    /// Perform one batch-reduce GEMM.
    fn brgemm(&self, args: &BrgemmArgs<'_>);
}

/// Straightforward batch-reduce GEMM.
///
/// Floating point operands accumulate in `f32`, integer operands in wrapping `i32`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBrgemm;

impl MicroKernel for ReferenceBrgemm {
    fn brgemm(&self, args: &BrgemmArgs<'_>) {
        let integer = !args.a.elem().is_float();

        for mm in 0..args.m {
            for nn in 0..args.n {
                let c_pos = args.c_offset + args.c_index(mm, nn);

                if integer {
                    let mut acc = match args.mode {
                        BrgemmMode::Init => 0,
                        BrgemmMode::Update => args.c.load_i32(c_pos),
                    };
                    for i in 0..args.batch {
                        for kk in 0..args.k {
                            let a = args.a.load_i32(args.a_offset + args.a_index(i, mm, kk));
                            let b = args.b.load_i32(args.b_offset + args.b_index(i, kk, nn));
                            acc = acc.wrapping_add(a.wrapping_mul(b));
                        }
                    }
                    args.c.store_i32(c_pos, acc);
                } else {
                    let mut acc = match args.mode {
                        BrgemmMode::Init => 0.0,
                        BrgemmMode::Update => args.c.load_f32(c_pos),
                    };
                    for i in 0..args.batch {
                        for kk in 0..args.k {
                            let a = args.a.load_f32(args.a_offset + args.a_index(i, mm, kk));
                            let b = args.b.load_f32(args.b_offset + args.b_index(i, kk, nn));
                            acc += a * b;
                        }
                    }
                    args.c.store_f32(c_pos, acc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecl_ir::ElemType;

    fn args<'a>(
        a: &'a SharedBuffer,
        b: &'a SharedBuffer,
        c: &'a SharedBuffer,
        b_pack: usize,
        mode: BrgemmMode,
    ) -> BrgemmArgs<'a> {
        BrgemmArgs {
            a,
            a_offset: 0,
            b,
            b_offset: 0,
            c,
            c_offset: 0,
            batch: 2,
            m: 2,
            n: 2,
            k: 2,
            lda: 2,
            ldb: 2,
            ldc: 2,
            stride_a: 4,
            stride_b: 4,
            b_pack,
            mode,
        }
    }

    #[test]
    fn batch_is_reduced() {
        // A_0 = I, A_1 = 2I, B_0 = B_1 = [[1, 2], [3, 4]]
        let a = SharedBuffer::from_f32(ElemType::F32, &[1., 0., 0., 1., 2., 0., 0., 2.]);
        let b = SharedBuffer::from_f32(ElemType::F32, &[1., 2., 3., 4., 1., 2., 3., 4.]);
        let c = SharedBuffer::from_f32(ElemType::F32, &[100.; 4]);

        ReferenceBrgemm.brgemm(&args(&a, &b, &c, 1, BrgemmMode::Init));
        assert_eq!(c.to_f32_vec(), vec![3., 6., 9., 12.]);

        ReferenceBrgemm.brgemm(&args(&a, &b, &c, 1, BrgemmMode::Update));
        assert_eq!(c.to_f32_vec(), vec![6., 12., 18., 24.]);
    }

    #[test]
    fn packed_rhs_is_interleaved() {
        // B = [[1, 2], [3, 4]] packed by two: [b00, b10, b01, b11]
        let a = SharedBuffer::from_i32(ElemType::S8, &[1, 0, 0, 1, 0, 0, 0, 0]);
        let b = SharedBuffer::from_i32(ElemType::S8, &[1, 3, 2, 4, 0, 0, 0, 0]);
        let c = SharedBuffer::zeros(ElemType::S32, 4);

        let args = args(&a, &b, &c, 2, BrgemmMode::Init);
        ReferenceBrgemm.brgemm(&args);

        assert_eq!(c.to_i32_vec(), vec![1, 2, 3, 4]);
        assert_eq!(args.b_extent(), 8);
        assert_eq!(args.a_extent(), 8);
        assert_eq!(args.c_extent(), 4);
    }
}
