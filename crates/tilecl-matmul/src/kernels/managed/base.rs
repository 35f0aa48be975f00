use tilecl_ir::{Expr, FusionManager, IrBuilder, Kernel, LoopKind, TensorId, TensorKind};
use tilecl_runtime::HardwareContext;

use super::{AnchorEmitter, AxisSplit, MatmulLayout};
use crate::components::{
    balance211_expr, FormattedConfigError, MatmulElems, MatmulSetupError, ResolvedProblem,
    TilingConfig,
};

/// Name of the lhs tensor of generated kernels.
pub const LHS: &str = "A";
/// Name of the rhs tensor of generated kernels.
pub const RHS: &str = "B";
/// Name of the output tensor of generated kernels.
pub const OUT: &str = "C";
/// Name of the partial sums buffer, only declared when K is split between teams.
pub const PARTIAL: &str = "C_partial";

/// Generate the parallel loop nest computing `problem` with the given tiling.
///
/// Every anchor placed in the kernel is also registered with `fusion`, in placement order, once
/// the kernel is complete.
pub fn generate(
    problem: &ResolvedProblem,
    config: &TilingConfig,
    hw: &HardwareContext,
    fusion: Option<&mut dyn FusionManager>,
) -> Result<Kernel, MatmulSetupError> {
    validate_splits(config, hw)?;

    let blocks = problem.blocks;
    let m_split = AxisSplit::new(problem.m, blocks.m, config.m_split_num);
    let n_split = AxisSplit::new(problem.n, blocks.n, config.n_split_num);
    let k_split = AxisSplit::new(problem.k, blocks.k, config.k_split_num());
    m_split.validate_sub_blocks("M", config.m_sub_block)?;
    n_split.validate_sub_blocks("N", config.n_sub_block)?;
    k_split.validate_sub_blocks("K", config.k_sub_block)?;

    let layout = MatmulLayout::new(problem);
    let elems = problem.elems();

    let name = format!(
        "managed_matmul_{}x{}x{}",
        problem.problem.m, problem.problem.n, problem.problem.k
    );
    log::debug!("Generating {name} with blocks {blocks} and {config}");

    let mut builder = IrBuilder::new(name);
    let lhs = builder.declare_tensor(LHS, elems.lhs, layout.lhs_shape(), TensorKind::Input);
    let rhs = builder.declare_tensor(RHS, elems.rhs, layout.rhs_shape(), TensorKind::Input);
    let out = builder.declare_tensor(OUT, elems.out, layout.out_shape(), TensorKind::Output);
    let partial = match config.k_split_num() > 1 {
        true => Some(builder.declare_tensor(
            PARTIAL,
            elems.accumulator(),
            layout.partial_shape(k_split.real_split()),
            TensorKind::Temporary,
        )),
        false => None,
    };

    let matmul = ManagedMatmul {
        layout,
        config: *config,
        elems,
        lhs,
        rhs,
        out,
        partial,
        m_split,
        n_split,
        k_split,
    };
    matmul.expand(&mut builder);

    let kernel = builder.build();

    if let Some(fusion) = fusion {
        for anchor in kernel.anchors.iter() {
            fusion.register_ready_region(anchor);
        }
    }

    Ok(kernel)
}

fn validate_splits(config: &TilingConfig, hw: &HardwareContext) -> Result<(), MatmulSetupError> {
    let threads = hw.num_threads();
    let m_split = config.m_split_num;
    let n_split = config.n_split_num;

    if m_split == 0 || n_split == 0 {
        return Err(FormattedConfigError::new(move || {
            format!("Split counts must be positive, got M={m_split} N={n_split}")
        })
        .into());
    }

    let k_split = config.k_split_num();
    if m_split * n_split * k_split > threads {
        return Err(FormattedConfigError::new(move || {
            format!(
                "Split {m_split}x{n_split}x{k_split} needs more than the {threads} available threads"
            )
        })
        .into());
    }

    Ok(())
}

/// Everything the loop nest of one kernel is derived from.
pub(super) struct ManagedMatmul {
    pub layout: MatmulLayout,
    pub config: TilingConfig,
    pub elems: MatmulElems,
    pub lhs: TensorId,
    pub rhs: TensorId,
    pub out: TensorId,
    pub partial: Option<TensorId>,
    pub m_split: AxisSplit,
    pub n_split: AxisSplit,
    pub k_split: AxisSplit,
}

/// Output region and reduction range of a team, in elements.
#[derive(Debug, Clone)]
pub(super) struct TeamRegion {
    pub m_s: Expr,
    pub n_s: Expr,
    pub m_idx: Expr,
    pub m_thr: Expr,
    pub n_idx: Expr,
    pub n_thr: Expr,
    pub k_idx: Expr,
    pub k_thr: Expr,
}

/// Tensor a worker writes its products to.
#[derive(Debug, Clone)]
pub(super) enum OutputTarget {
    /// The output tensor.
    Final,
    /// The slice of the partial sums buffer owned by the reduction team.
    Partial { buffer: TensorId, slice: Expr },
}

impl ManagedMatmul {
    pub fn anchors(&self) -> AnchorEmitter<'_> {
        AnchorEmitter {
            layout: &self.layout,
            out: self.out,
            m_split: &self.m_split,
            n_split: &self.n_split,
            m_sub_block: self.config.m_sub_block,
            n_sub_block: self.config.n_sub_block,
        }
    }

    fn expand(&self, builder: &mut IrBuilder) {
        let layout = &self.layout;
        let iim = layout.blocks.m;
        let iin = layout.blocks.n;
        let m_blocks = Expr::from(self.m_split.blocks());
        let n_blocks = Expr::from(self.n_split.blocks());

        let m_loop = builder.for_loop(
            "m_s",
            0,
            self.m_split.real_split(),
            LoopKind::Parallel {
                num_threads: self.config.m_split_num,
            },
            |b, m_s| {
                let (m_start, m_len) = balance211_expr(&m_blocks, self.config.m_split_num, &m_s);
                let m_idx = b.var_init("m_idx", m_start * iim);
                let m_thr = b.var_init("m_thr", m_len * iim);

                b.for_loop(
                    "n_s",
                    0,
                    self.n_split.real_split(),
                    LoopKind::Parallel {
                        num_threads: self.config.n_split_num,
                    },
                    |b, n_s| {
                        let (n_start, n_len) =
                            balance211_expr(&n_blocks, self.config.n_split_num, &n_s);
                        let n_idx = b.var_init("n_idx", n_start * iin);
                        let n_thr = b.var_init("n_thr", n_len * iin);

                        let team = TeamRegion {
                            m_s: m_s.clone(),
                            n_s: n_s.clone(),
                            m_idx: m_idx.clone(),
                            m_thr: m_thr.clone(),
                            n_idx,
                            n_thr,
                            k_idx: Expr::from(0),
                            k_thr: Expr::from(layout.k),
                        };
                        let in_bounds = team.m_idx.lt(layout.m).and(team.n_idx.lt(layout.n));

                        b.if_then(in_bounds, |b| self.team(b, &team));
                    },
                );

                if self.config.n_split_num == 1 {
                    b.if_then(m_idx.lt(layout.m), |b| {
                        self.anchors().row_panel(b, &m_idx, &m_thr)
                    });
                }
            },
        );

        let attrs = builder.loop_attrs_mut(m_loop);
        attrs.parallel_merge = true;
        attrs.merge_granularity = Some(iim);
    }

    /// Work of one M x N team, split along K between the threads of the team when needed.
    fn team(&self, builder: &mut IrBuilder, team: &TeamRegion) {
        match self.partial {
            None => self.single_core(builder, team, &OutputTarget::Final),
            Some(buffer) => {
                let iik = self.layout.blocks.k;
                let k_blocks = Expr::from(self.k_split.blocks());
                let k_split_num = self.config.k_split_num();

                builder.for_loop(
                    "k_s",
                    0,
                    self.k_split.real_split(),
                    LoopKind::Parallel {
                        num_threads: k_split_num,
                    },
                    |b, k_s| {
                        let (k_start, k_len) = balance211_expr(&k_blocks, k_split_num, &k_s);
                        let k_team = TeamRegion {
                            k_idx: b.var_init("k_idx", k_start * iik),
                            k_thr: b.var_init("k_thr", k_len * iik),
                            ..team.clone()
                        };
                        let target = OutputTarget::Partial {
                            buffer,
                            slice: k_s,
                        };

                        self.single_core(b, &k_team, &target);
                    },
                );

                self.reduce_partials(builder, team, buffer);
            }
        }

        self.anchors()
            .team(builder, &team.m_s, &team.n_s, &team.m_idx, &team.n_idx);
    }
}
