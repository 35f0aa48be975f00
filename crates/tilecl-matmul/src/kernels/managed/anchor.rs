use tilecl_ir::{AnchorRegion, AnchorScope, DimRange, Expr, IrBuilder, TensorId};

use super::{AxisSplit, MatmulLayout};
use crate::components::{balance211_bigger_expr, MatrixLayout};

/// Boolean conditions distinguishing the shapes of an output region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFlag {
    /// The worker belongs to an imbalanced M team.
    MTeam,
    /// The worker belongs to an imbalanced N team.
    NTeam,
    /// The row sub-block is one of the smaller ones of its team.
    MSub,
    /// The column sub-block is one of the smaller ones of its team.
    NSub,
}

/// Shape of an output region, one value per [flag](BoundaryFlag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundaryCase {
    pub m_imbalanced: bool,
    pub n_imbalanced: bool,
    pub m_sub_short: bool,
    pub n_sub_short: bool,
}

impl BoundaryCase {
    fn set(&mut self, flag: BoundaryFlag) {
        match flag {
            BoundaryFlag::MTeam => self.m_imbalanced = true,
            BoundaryFlag::NTeam => self.n_imbalanced = true,
            BoundaryFlag::MSub => self.m_sub_short = true,
            BoundaryFlag::NSub => self.n_sub_short = true,
        }
    }
}

/// Table of the region shapes an anchor may take.
///
/// Flags that are statically false are left out, so the table has `2^live` entries and a
/// regular split yields a single unconditional region. The selector packs the live flags into an
/// integer tag, the first flag added being the most significant bit.
#[derive(Debug, Default)]
pub struct BoundaryTable {
    flags: Vec<(BoundaryFlag, Expr)>,
}

impl BoundaryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flag set when `cond` is non-zero, ignored when `live` is false.
    pub fn flag(mut self, flag: BoundaryFlag, cond: Expr, live: bool) -> Self {
        if live {
            self.flags.push((flag, cond));
        }
        self
    }

    /// Shapes indexed by tag.
    pub fn cases(&self) -> Vec<BoundaryCase> {
        let num_flags = self.flags.len();

        (0..1usize << num_flags)
            .map(|tag| {
                let mut case = BoundaryCase::default();
                for (i, (flag, _)) in self.flags.iter().enumerate() {
                    if tag & (1 << (num_flags - 1 - i)) != 0 {
                        case.set(*flag);
                    }
                }
                case
            })
            .collect()
    }

    /// Tag of the shape that applies at run time.
    pub fn selector(&self) -> Expr {
        let num_flags = self.flags.len();

        self.flags
            .iter()
            .enumerate()
            .fold(Expr::from(0), |tag, (i, (_, cond))| {
                tag + cond * (1usize << (num_flags - 1 - i))
            })
    }
}

/// Places the fusion anchors of a generated matmul.
#[derive(Debug, Clone, Copy)]
pub struct AnchorEmitter<'a> {
    pub layout: &'a MatmulLayout,
    pub out: TensorId,
    pub m_split: &'a AxisSplit,
    pub n_split: &'a AxisSplit,
    pub m_sub_block: usize,
    pub n_sub_block: usize,
}

impl AnchorEmitter<'_> {
    /// Region of the output starting at element `(m, n)` spanning a number of whole blocks.
    pub fn region(&self, m: &Expr, m_blocks: Expr, n: &Expr, n_blocks: Expr) -> AnchorRegion {
        let iim = self.layout.blocks.m;
        let iin = self.layout.blocks.n;

        let ranges = match self.layout.out {
            MatrixLayout::Plain => vec![
                DimRange::new(m.clone(), m_blocks * iim),
                DimRange::new(n.clone(), n_blocks * iin),
            ],
            MatrixLayout::Blocked => vec![
                DimRange::new(m / iim, m_blocks),
                DimRange::new(n / iin, n_blocks),
                DimRange::new(0.into(), iim.into()),
                DimRange::new(0.into(), iin.into()),
            ],
        };
        AnchorRegion::new(ranges)
    }

    /// A single tile, final once its last reduction chunk is accumulated.
    pub fn tile(&self, builder: &mut IrBuilder, scope: AnchorScope, m: &Expr, n: &Expr) {
        let region = self.region(m, 1.into(), n, 1.into());
        builder.anchor(scope, self.out, vec![region], 0.into());
    }

    /// The output of a team, with one variant per combination of team imbalance.
    pub fn team(
        &self,
        builder: &mut IrBuilder,
        m_s: &Expr,
        n_s: &Expr,
        m_idx: &Expr,
        n_idx: &Expr,
    ) {
        let table = BoundaryTable::new()
            .flag(
                BoundaryFlag::MTeam,
                m_s.ge(self.m_split.blk_num),
                self.m_split.has_imbalance(),
            )
            .flag(
                BoundaryFlag::NTeam,
                n_s.ge(self.n_split.blk_num),
                self.n_split.has_imbalance(),
            );

        let variants = table
            .cases()
            .into_iter()
            .map(|case| {
                let m_blocks = self.m_split.team_blocks(case.m_imbalanced);
                let n_blocks = self.n_split.team_blocks(case.n_imbalanced);
                self.region(m_idx, m_blocks.into(), n_idx, n_blocks.into())
            })
            .collect();

        builder.anchor(AnchorScope::Team, self.out, variants, table.selector());
    }

    /// Every column of the rows of an M team, when N is not split.
    pub fn row_panel(&self, builder: &mut IrBuilder, m_idx: &Expr, m_thr: &Expr) {
        let region = self.region(
            m_idx,
            m_thr / self.layout.blocks.m,
            &Expr::from(0),
            Expr::from(self.layout.n / self.layout.blocks.n),
        );
        builder.anchor(AnchorScope::RowPanel, self.out, vec![region], 0.into());
    }

    /// A cache sub-block of a worker.
    ///
    /// The region depends on the team kind on both axes and on whether the sub-block is one of the
    /// larger ones of its team, which makes up to 16 shapes.
    pub fn sub_block(&self, builder: &mut IrBuilder, coords: &SubBlockCoords) {
        let iim = self.layout.blocks.m;
        let iin = self.layout.blocks.n;
        let m_bigger = balance211_bigger_expr(&(&coords.m_thr / iim), self.m_sub_block);
        let n_bigger = balance211_bigger_expr(&(&coords.n_thr / iin), self.n_sub_block);

        let table = BoundaryTable::new()
            .flag(
                BoundaryFlag::MTeam,
                coords.m_s.ge(self.m_split.blk_num),
                self.m_split.has_imbalance(),
            )
            .flag(
                BoundaryFlag::NTeam,
                coords.n_s.ge(self.n_split.blk_num),
                self.n_split.has_imbalance(),
            )
            .flag(
                BoundaryFlag::MSub,
                coords.m_b.ge(m_bigger),
                self.m_split.uneven_sub_blocks(self.m_sub_block),
            )
            .flag(
                BoundaryFlag::NSub,
                coords.n_b.ge(n_bigger),
                self.n_split.uneven_sub_blocks(self.n_sub_block),
            );

        let m_offset = &coords.m_idx + &coords.m_b_idx * iim;
        let n_offset = &coords.n_idx + &coords.n_b_idx * iin;

        let variants = table
            .cases()
            .into_iter()
            .map(|case| {
                let m_blocks = sub_block_len(
                    self.m_split.team_blocks(case.m_imbalanced),
                    self.m_sub_block,
                    case.m_sub_short,
                );
                let n_blocks = sub_block_len(
                    self.n_split.team_blocks(case.n_imbalanced),
                    self.n_sub_block,
                    case.n_sub_short,
                );
                self.region(&m_offset, m_blocks.into(), &n_offset, n_blocks.into())
            })
            .collect();

        builder.anchor(AnchorScope::SubBlock, self.out, variants, table.selector());
    }
}

/// Loop variables locating a sub-block.
#[derive(Debug, Clone)]
pub struct SubBlockCoords {
    pub m_s: Expr,
    pub n_s: Expr,
    pub m_b: Expr,
    pub n_b: Expr,
    pub m_idx: Expr,
    pub n_idx: Expr,
    pub m_thr: Expr,
    pub n_thr: Expr,
    pub m_b_idx: Expr,
    pub n_b_idx: Expr,
}

/// Blocks of a sub-block when `team_blocks` are split in `sub_blocks`.
fn sub_block_len(team_blocks: usize, sub_blocks: usize, short: bool) -> usize {
    let base = team_blocks / sub_blocks;
    match team_blocks % sub_blocks != 0 && !short {
        true => base + 1,
        false => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilecl_ir::{ExprEnv, VarId};

    struct Flags(Vec<i64>);

    impl ExprEnv for Flags {
        fn var(&self, id: VarId) -> Option<i64> {
            self.0.get(id.index()).copied()
        }

        fn thread_id(&self) -> i64 {
            0
        }
    }

    #[test]
    fn dead_flags_collapse_the_table() {
        let table = BoundaryTable::new()
            .flag(BoundaryFlag::MTeam, Expr::Var(VarId(0)), false)
            .flag(BoundaryFlag::NTeam, Expr::Var(VarId(1)), false);

        assert_eq!(table.cases(), vec![BoundaryCase::default()]);
        assert_eq!(table.selector(), Expr::from(0));
    }

    #[test]
    fn full_table_has_sixteen_distinct_cases() {
        let table = BoundaryTable::new()
            .flag(BoundaryFlag::MTeam, Expr::Var(VarId(0)), true)
            .flag(BoundaryFlag::NTeam, Expr::Var(VarId(1)), true)
            .flag(BoundaryFlag::MSub, Expr::Var(VarId(2)), true)
            .flag(BoundaryFlag::NSub, Expr::Var(VarId(3)), true);
        let cases = table.cases();

        assert_eq!(cases.len(), 16);
        for (tag, case) in cases.iter().enumerate() {
            assert_eq!(cases.iter().filter(|other| *other == case).count(), 1);

            let flags = Flags(vec![
                case.m_imbalanced as i64,
                case.n_imbalanced as i64,
                case.m_sub_short as i64,
                case.n_sub_short as i64,
            ]);
            assert_eq!(table.selector().eval(&flags).unwrap(), tag as i64);
        }
    }

    #[test]
    fn partial_table_keeps_flag_order() {
        let table = BoundaryTable::new()
            .flag(BoundaryFlag::MTeam, Expr::Var(VarId(0)), true)
            .flag(BoundaryFlag::NTeam, Expr::Var(VarId(1)), false)
            .flag(BoundaryFlag::MSub, Expr::Var(VarId(1)), true);
        let cases = table.cases();

        assert_eq!(cases.len(), 4);
        assert!(cases[2].m_imbalanced && !cases[2].m_sub_short);
        assert!(!cases[1].m_imbalanced && cases[1].m_sub_short);
        assert!(cases.iter().all(|case| !case.n_imbalanced));
    }

    #[test]
    fn sub_block_lengths() {
        // 5 blocks on 2 sub-blocks: 3 then 2.
        assert_eq!(sub_block_len(5, 2, false), 3);
        assert_eq!(sub_block_len(5, 2, true), 2);
        assert_eq!(sub_block_len(4, 2, false), 2);
    }
}
