use core::fmt::Display;

use crate::{AnchorId, Expr, TensorId};

/// Granularity of the output region an anchor marks as ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnchorScope {
    /// One micro-kernel output tile, once its last reduction step completed.
    Tile,
    /// All tiles of one cache sub-block of a worker.
    SubBlock,
    /// The whole output region of one parallel team.
    Team,
    /// All columns of a row panel, emitted when the column axis is not split.
    RowPanel,
    /// One output tile produced by the partial-sum reduction pass.
    ReduceTile,
}

impl Display for AnchorScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AnchorScope::Tile => f.write_str("tile"),
            AnchorScope::SubBlock => f.write_str("sub_block"),
            AnchorScope::Team => f.write_str("team"),
            AnchorScope::RowPanel => f.write_str("row_panel"),
            AnchorScope::ReduceTile => f.write_str("reduce_tile"),
        }
    }
}

/// Contiguous range along one dimension of a tensor.
#[derive(new, Debug, Clone, PartialEq)]
pub struct DimRange {
    /// First index.
    pub offset: Expr,
    /// Number of indices.
    pub len: Expr,
}

/// Hyper-rectangle of a tensor, one range per dimension.
#[derive(new, Debug, Clone, PartialEq)]
pub struct AnchorRegion {
    /// One range per dimension.
    pub ranges: Vec<DimRange>,
}

/// Output region that becomes final at the point where the anchor is placed.
///
/// An anchor holds either a single region, or a list of mutually exclusive variants and a
/// selector expression evaluating to the index of the variant that applies to the executing
/// worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionAnchor {
    /// Handle of the anchor.
    pub id: AnchorId,
    /// Granularity of the region.
    pub scope: AnchorScope,
    /// Tensor the region belongs to.
    pub tensor: TensorId,
    /// Candidate regions.
    pub variants: Vec<AnchorRegion>,
    /// Index of the variant that applies, `None` when there is a single variant.
    pub selector: Option<Expr>,
}

impl FusionAnchor {
    /// Whether the anchor needs a runtime selection.
    pub fn is_conditional(&self) -> bool {
        self.variants.len() > 1
    }
}

/// Receives the regions registered by a kernel generator.
pub trait FusionManager {
    /// Called once for every anchor placed in the generated kernel.
    fn register_ready_region(&mut self, anchor: &FusionAnchor);
}

/// [Fusion manager](FusionManager) keeping every registered anchor.
#[derive(Debug, Default)]
pub struct AnchorRecorder {
    /// Anchors in registration order.
    pub anchors: Vec<FusionAnchor>,
}

impl FusionManager for AnchorRecorder {
    fn register_ready_region(&mut self, anchor: &FusionAnchor) {
        self.anchors.push(anchor.clone());
    }
}

impl AnchorRecorder {
    /// Recorded anchors with the given scope.
    pub fn with_scope(&self, scope: AnchorScope) -> impl Iterator<Item = &FusionAnchor> {
        self.anchors
            .iter()
            .filter(move |anchor| anchor.scope == scope)
    }
}
