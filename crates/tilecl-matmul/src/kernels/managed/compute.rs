use tilecl_ir::{AnchorScope, BrgemmCall, BrgemmMode, Expr, IrBuilder, LoopId, LoopKind};

use super::anchor::SubBlockCoords;
use super::base::{ManagedMatmul, OutputTarget, TeamRegion};
use crate::components::{balance211_expr, BlockSizes, LoopOrder};

impl ManagedMatmul {
    /// Sequential loop nest of one worker over the region of its team.
    ///
    /// The region is cut into `m_sub_block x n_sub_block` sub-blocks, and the reduction range into
    /// `k_sub_block` chunks, each chunk being one batch-reduce call per tile. Workers start at a
    /// tile rotated by their thread id so that threads sharing operands do not read the same
    /// tiles at the same time.
    pub(super) fn single_core(
        &self,
        builder: &mut IrBuilder,
        team: &TeamRegion,
        target: &OutputTarget,
    ) {
        let BlockSizes {
            m: iim,
            n: iin,
            k: iik,
        } = self.layout.blocks;
        let config = &self.config;
        let (m_sub, n_sub, k_sub) = (config.m_sub_block, config.n_sub_block, config.k_sub_block);

        let tid = builder.var_init("tid", Expr::ThreadId);
        let m_blocks = builder.var_init("m_blocks", &team.m_thr / iim);
        let n_blocks = builder.var_init("n_blocks", &team.n_thr / iin);
        let k_blocks = builder.var_init("k_blocks", &team.k_thr / iik);

        builder.for_loop("m_b", 0, m_sub, LoopKind::Serial, |b, m_b| {
            let mut reduce_loops: Vec<LoopId> = Vec::new();

            let n_b_loop = b.for_loop("n_b", 0, n_sub, LoopKind::Serial, |b, n_b| {
                let (m_b_idx, m_o_end) = balance211_expr(&m_blocks, m_sub, &m_b);
                let m_b_idx = b.var_init("m_b_idx", m_b_idx);
                let m_o_end = b.var_init("m_o_end", m_o_end);
                let (n_b_idx, n_o_end) = balance211_expr(&n_blocks, n_sub, &n_b);
                let n_b_idx = b.var_init("n_b_idx", n_b_idx);
                let n_o_end = b.var_init("n_o_end", n_o_end);

                b.for_loop("k_b", 0, k_sub, LoopKind::Serial, |b, k_b| {
                    let (k_b_idx, bs) = balance211_expr(&k_blocks, k_sub, &k_b);
                    let k_b_idx = b.var_init("k_b_idx", k_b_idx);
                    let bs = b.var_init("bs", bs);
                    let k_start = b.var_init("k_start", &team.k_idx + &k_b_idx * iik);

                    let tile = |b: &mut IrBuilder, m_o: &Expr, n_o: &Expr| {
                        let m_start = b.var_init(
                            "m_start",
                            &team.m_idx + &m_b_idx * iim + ((m_o + &tid) % &m_o_end) * iim,
                        );
                        let n_start = b.var_init(
                            "n_start",
                            &team.n_idx + &n_b_idx * iin + ((n_o + &tid) % &n_o_end) * iin,
                        );
                        self.brgemm(b, target, &m_start, &n_start, &k_start, &bs, &k_b);

                        if let OutputTarget::Final = target {
                            let last_chunk = match k_sub {
                                1 => Expr::from(1),
                                _ => k_b.equal(k_sub - 1),
                            };
                            b.if_then(last_chunk, |b| {
                                self.anchors()
                                    .tile(b, AnchorScope::Tile, &m_start, &n_start)
                            });
                        }
                    };

                    match config.loop_order {
                        LoopOrder::MFirst => {
                            b.for_loop("m_o", 0, &m_o_end, LoopKind::Serial, |b, m_o| {
                                let inner =
                                    b.for_loop("n_o", 0, &n_o_end, LoopKind::Serial, |b, n_o| {
                                        tile(b, &m_o, &n_o)
                                    });
                                if k_sub > 1 {
                                    reduce_loops.push(inner);
                                }
                            });
                        }
                        LoopOrder::NFirst => {
                            b.for_loop("n_o", 0, &n_o_end, LoopKind::Serial, |b, n_o| {
                                let inner =
                                    b.for_loop("m_o", 0, &m_o_end, LoopKind::Serial, |b, m_o| {
                                        tile(b, &m_o, &n_o)
                                    });
                                if k_sub > 1 {
                                    reduce_loops.push(inner);
                                }
                            });
                        }
                    }
                });

                if let OutputTarget::Final = target {
                    let coords = SubBlockCoords {
                        m_s: team.m_s.clone(),
                        n_s: team.n_s.clone(),
                        m_b: m_b.clone(),
                        n_b,
                        m_idx: team.m_idx.clone(),
                        n_idx: team.n_idx.clone(),
                        m_thr: team.m_thr.clone(),
                        n_thr: team.n_thr.clone(),
                        m_b_idx,
                        n_b_idx,
                    };
                    self.anchors().sub_block(b, &coords);
                }
            });

            for inner in reduce_loops {
                b.loop_attrs_mut(inner).reduce_root = Some(n_b_loop);
            }
        });
    }

    /// One batch-reduce call over `bs` reduction blocks, initializing the output on the first
    /// reduction chunk.
    #[allow(clippy::too_many_arguments)]
    fn brgemm(
        &self,
        builder: &mut IrBuilder,
        target: &OutputTarget,
        m_start: &Expr,
        n_start: &Expr,
        k_start: &Expr,
        bs: &Expr,
        k_b: &Expr,
    ) {
        let layout = &self.layout;
        let c = match target {
            OutputTarget::Final => layout.out_ptr(self.out, None, m_start, n_start),
            OutputTarget::Partial { buffer, slice } => {
                layout.out_ptr(*buffer, Some(slice), m_start, n_start)
            }
        };

        let call = BrgemmCall {
            a: layout.lhs_ptr(self.lhs, m_start, k_start),
            b: layout.rhs_ptr(self.rhs, k_start, n_start),
            c,
            batch: bs.clone(),
            m: layout.blocks.m,
            n: layout.blocks.n,
            k: layout.blocks.k,
            lda: layout.lda(),
            ldb: layout.ldb(),
            ldc: layout.ldc(),
            stride_a: layout.stride_a(),
            stride_b: layout.stride_b(),
            a_elem: self.elems.lhs,
            b_elem: self.elems.rhs,
            b_pack: layout.dtype_block,
            mode: BrgemmMode::Init,
        };

        if self.config.k_sub_block == 1 {
            builder.brgemm(call);
            return;
        }

        builder.if_then_else(
            k_b.equal(0),
            &mut (),
            |b, _| b.brgemm(call.clone()),
            |b, _| {
                b.brgemm(BrgemmCall {
                    mode: BrgemmMode::Update,
                    ..call.clone()
                })
            },
        );
    }
}
