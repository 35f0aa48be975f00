use tilecl_ir::{AnchorScope, IrBuilder, LoopKind, TensorId};

use super::base::{ManagedMatmul, TeamRegion};
use crate::components::MatrixLayout;

impl ManagedMatmul {
    /// Sum the slices of the partial buffer into the output region of a team.
    ///
    /// Iterations own one output tile each, so the threads of the reduction team never write the
    /// same element. Must be placed after the loop filling the partial buffer.
    pub(super) fn reduce_partials(
        &self,
        builder: &mut IrBuilder,
        team: &TeamRegion,
        buffer: TensorId,
    ) {
        let layout = &self.layout;
        let iim = layout.blocks.m;
        let iin = layout.blocks.n;
        let k_real_split = self.k_split.real_split();

        let m_tiles = builder.var_init("m_tiles", &team.m_thr / iim);
        let n_tiles = builder.var_init("n_tiles", &team.n_thr / iin);

        builder.for_loop(
            "lm_ln",
            0,
            &m_tiles * &n_tiles,
            LoopKind::Parallel {
                num_threads: self.config.k_split_num(),
            },
            |b, lm_ln| {
                let lm = b.var_init("lm", &lm_ln / &n_tiles);
                let ln = b.var_init("ln", &lm_ln % &n_tiles);
                let m = b.var_init("m", &team.m_idx + &lm * iim);
                let n = b.var_init("n", &team.n_idx + &ln * iin);

                match layout.out {
                    MatrixLayout::Plain => {
                        b.for_loop("row", 0, iim, LoopKind::Serial, |b, row| {
                            let m_row = &m + &row;
                            let dst = layout.out_ptr(self.out, None, &m_row, &n);

                            b.mem_zero(dst.clone(), iin);
                            b.for_loop("lks", 0, k_real_split, LoopKind::Serial, |b, lks| {
                                let src = layout.out_ptr(buffer, Some(&lks), &m_row, &n);
                                b.accumulate(dst.clone(), src, iin);
                            });
                        });
                    }
                    MatrixLayout::Blocked => {
                        let dst = layout.out_ptr(self.out, None, &m, &n);

                        b.mem_zero(dst.clone(), iim * iin);
                        b.for_loop("lks", 0, k_real_split, LoopKind::Serial, |b, lks| {
                            let src = layout.out_ptr(buffer, Some(&lks), &m, &n);
                            b.accumulate(dst.clone(), src, iim * iin);
                        });
                    }
                }

                self.anchors().tile(b, AnchorScope::ReduceTile, &m, &n);
            },
        );
    }
}
