use serde::{Deserialize, Serialize};

use crate::{Block, ElemType, FusionAnchor, LoopKind, Stmt, VarId};

/// Handle of a tensor declared in a [kernel](Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u32);

/// Handle of a loop in the [kernel](Kernel) loop arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LoopId(pub u32);

/// Handle of a [fusion anchor](FusionAnchor) registered in a [kernel](Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(pub u32);

/// Origin of the storage of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TensorKind {
    /// Provided by the caller, read only.
    Input,
    /// Provided by the caller, written by the kernel.
    Output,
    /// Allocated for the duration of one execution.
    Temporary,
}

/// Dense row-major tensor used by a kernel.
#[derive(new, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDecl {
    /// Handle of the tensor.
    pub id: TensorId,
    /// Name used for binding and printing.
    pub name: String,
    /// Element type.
    pub elem: ElemType,
    /// Extent of every dimension.
    pub shape: Vec<usize>,
    /// Origin of the storage.
    pub kind: TensorKind,
}

impl TensorDecl {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the tensor has no element.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for i in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.shape[i + 1];
        }
        strides
    }
}

/// Variable of a kernel.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    /// Handle of the variable.
    pub id: VarId,
    /// Name used when printing.
    pub name: String,
}

/// Attributes attached to a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopAttrs {
    /// Loop whose iterations must complete before the partial sums produced in this loop are
    /// considered final.
    pub reduce_root: Option<LoopId>,
    /// The loop may be merged with the parallel loop of a fused consumer.
    pub parallel_merge: bool,
    /// Number of elements covered by one iteration when merging.
    pub merge_granularity: Option<usize>,
}

/// Entry of the kernel loop arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopNode {
    /// Handle of the loop.
    pub id: LoopId,
    /// Induction variable.
    pub var: VarId,
    /// Scheduling of the iterations.
    pub kind: LoopKind,
    /// Attributes.
    pub attrs: LoopAttrs,
}

/// A generated kernel: declarations plus a loop nest.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    /// Name of the kernel.
    pub name: String,
    /// Declared tensors, indexed by [TensorId].
    pub tensors: Vec<TensorDecl>,
    /// Declared variables, indexed by [VarId].
    pub vars: Vec<VarDecl>,
    /// Loop arena, indexed by [LoopId].
    pub loops: Vec<LoopNode>,
    /// Registered anchors, indexed by [AnchorId].
    pub anchors: Vec<FusionAnchor>,
    /// Kernel body.
    pub body: Block,
}

impl Kernel {
    /// Declaration of a tensor.
    pub fn tensor(&self, id: TensorId) -> &TensorDecl {
        &self.tensors[id.0 as usize]
    }

    /// Find a tensor by name.
    pub fn find_tensor(&self, name: &str) -> Option<&TensorDecl> {
        self.tensors.iter().find(|tensor| tensor.name == name)
    }

    /// Entry of the loop arena.
    pub fn loop_node(&self, id: LoopId) -> &LoopNode {
        &self.loops[id.0 as usize]
    }

    /// Registered anchor.
    pub fn anchor(&self, id: AnchorId) -> &FusionAnchor {
        &self.anchors[id.0 as usize]
    }

    /// Name of a variable.
    pub fn var_name(&self, id: VarId) -> &str {
        &self.vars[id.index()].name
    }

    /// Visit every statement of the kernel in program order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Stmt)) {
        self.body.walk(visit)
    }

    /// Loops with the given induction variable name, in program order.
    pub fn loops_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a LoopNode> + 'a {
        self.loops
            .iter()
            .filter(move |node| self.var_name(node.var) == name)
    }
}
