use crate::{
    AnchorId, AnchorRegion, AnchorScope, Block, BrgemmCall, ElemType, Expr, FusionAnchor, ForLoop,
    Kernel, LoopAttrs, LoopId, LoopKind, LoopNode, Stmt, TensorDecl, TensorId, TensorKind,
    TensorPtr, VarDecl, VarId,
};

/// Incrementally builds a [kernel](Kernel).
///
/// Statements are appended to the innermost open block. Nested blocks are opened by the
/// closure-based methods ([for_loop](Self::for_loop), [if_then](Self::if_then), ...), which close
/// them when the closure returns.
///
/// Variables bound to a constant are not materialized: [var_init](Self::var_init) returns the
/// constant itself, which keeps every expression derived from it foldable.
#[derive(Debug)]
pub struct IrBuilder {
    name: String,
    tensors: Vec<TensorDecl>,
    vars: Vec<VarDecl>,
    loops: Vec<LoopNode>,
    anchors: Vec<FusionAnchor>,
    scopes: Vec<Vec<Stmt>>,
}

impl IrBuilder {
    /// Create a builder for a kernel with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tensors: Vec::new(),
            vars: Vec::new(),
            loops: Vec::new(),
            anchors: Vec::new(),
            scopes: vec![Vec::new()],
        }
    }

    /// Declare a tensor.
    pub fn declare_tensor(
        &mut self,
        name: impl Into<String>,
        elem: ElemType,
        shape: Vec<usize>,
        kind: TensorKind,
    ) -> TensorId {
        let id = TensorId(self.tensors.len() as u32);
        self.tensors
            .push(TensorDecl::new(id, name.into(), elem, shape, kind));
        id
    }

    /// Declaration of a tensor created by this builder.
    pub fn tensor(&self, id: TensorId) -> &TensorDecl {
        &self.tensors[id.0 as usize]
    }

    fn declare_var(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl::new(id, name.into()));
        id
    }

    /// Bind a value to a new variable and return an expression reading it.
    pub fn var_init(&mut self, name: impl Into<String>, value: impl Into<Expr>) -> Expr {
        let value = value.into();

        match value {
            Expr::Const(_) | Expr::Var(_) | Expr::ThreadId => value,
            value => {
                let var = self.declare_var(name);
                self.push(Stmt::Let { var, value });
                Expr::Var(var)
            }
        }
    }

    /// Append a statement to the current block.
    pub fn push(&mut self, stmt: Stmt) {
        // The root scope is never popped.
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(stmt);
        }
    }

    /// Append a comment to the current block.
    pub fn comment(&mut self, text: impl Into<String>) {
        self.push(Stmt::Comment(text.into()));
    }

    /// Append a micro-kernel call to the current block.
    pub fn brgemm(&mut self, call: BrgemmCall) {
        self.push(Stmt::Brgemm(call));
    }

    /// Append a zero fill to the current block.
    pub fn mem_zero(&mut self, dst: TensorPtr, len: impl Into<Expr>) {
        self.push(Stmt::MemZero {
            dst,
            len: len.into(),
        });
    }

    /// Append an element-wise accumulation to the current block.
    pub fn accumulate(&mut self, dst: TensorPtr, src: TensorPtr, len: impl Into<Expr>) {
        self.push(Stmt::Accumulate {
            dst,
            src,
            len: len.into(),
        });
    }

    /// Place a fusion anchor in the current block.
    ///
    /// With more than one variant, `selector` must evaluate to the index of the variant that
    /// applies. It is ignored otherwise.
    pub fn anchor(
        &mut self,
        scope: AnchorScope,
        tensor: TensorId,
        variants: Vec<AnchorRegion>,
        selector: Expr,
    ) -> AnchorId {
        let id = AnchorId(self.anchors.len() as u32);
        let selector = match variants.len() {
            0 | 1 => None,
            _ => Some(selector),
        };

        self.anchors.push(FusionAnchor {
            id,
            scope,
            tensor,
            variants,
            selector,
        });
        self.push(Stmt::Anchor(id));
        id
    }

    /// Append a loop over `start..end`, filling its body with `body`.
    ///
    /// The closure receives the induction variable.
    pub fn for_loop<F>(
        &mut self,
        name: impl Into<String>,
        start: impl Into<Expr>,
        end: impl Into<Expr>,
        kind: LoopKind,
        body: F,
    ) -> LoopId
    where
        F: FnOnce(&mut Self, Expr),
    {
        let var = self.declare_var(name);
        let id = LoopId(self.loops.len() as u32);
        self.loops.push(LoopNode {
            id,
            var,
            kind,
            attrs: LoopAttrs::default(),
        });

        let body = self.child(|builder| body(builder, Expr::Var(var)));

        self.push(Stmt::For(ForLoop {
            id,
            var,
            start: start.into(),
            end: end.into(),
            kind,
            body,
        }));

        id
    }

    /// Append a conditional block.
    ///
    /// A constant condition is resolved immediately: the body is either inlined or dropped.
    pub fn if_then<F>(&mut self, cond: impl Into<Expr>, body: F)
    where
        F: FnOnce(&mut Self),
    {
        let cond = cond.into();

        match cond.as_const() {
            Some(0) => {}
            Some(_) => body(self),
            None => {
                let then = self.child(body);
                self.push(Stmt::If {
                    cond,
                    then,
                    or_else: None,
                });
            }
        }
    }

    /// Append a two-way conditional.
    ///
    /// The builder is handed to one closure at a time, so both branches may capture the same
    /// mutable state through a shared parameter.
    pub fn if_then_else<S, F, G>(
        &mut self,
        cond: impl Into<Expr>,
        state: &mut S,
        then: F,
        or_else: G,
    )
    where
        S: ?Sized,
        F: FnOnce(&mut Self, &mut S),
        G: FnOnce(&mut Self, &mut S),
    {
        let cond = cond.into();

        match cond.as_const() {
            Some(0) => or_else(self, state),
            Some(_) => then(self, state),
            None => {
                let then = self.child(|builder| then(builder, state));
                let or_else = self.child(|builder| or_else(builder, state));
                self.push(Stmt::If {
                    cond,
                    then,
                    or_else: Some(or_else),
                });
            }
        }
    }

    /// Mutable access to the attributes of a loop created by this builder.
    pub fn loop_attrs_mut(&mut self, id: LoopId) -> &mut LoopAttrs {
        &mut self.loops[id.0 as usize].attrs
    }

    /// Registered anchors, in placement order.
    pub fn anchors(&self) -> &[FusionAnchor] {
        &self.anchors
    }

    /// Finish the kernel.
    pub fn build(mut self) -> Kernel {
        let stmts = self.scopes.pop().unwrap_or_default();

        Kernel {
            name: self.name,
            tensors: self.tensors,
            vars: self.vars,
            loops: self.loops,
            anchors: self.anchors,
            body: Block { stmts },
        }
    }

    fn child<F: FnOnce(&mut Self)>(&mut self, body: F) -> Block {
        self.scopes.push(Vec::new());
        body(self);
        let stmts = self.scopes.pop().unwrap_or_default();
        Block { stmts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn constant_bindings_are_propagated() {
        let mut builder = IrBuilder::new("test");
        let value = builder.var_init("four", Expr::from(2) * 2);
        let kernel = builder.build();

        assert_eq!(value, Expr::Const(4));
        assert!(kernel.body.stmts.is_empty());
        assert!(kernel.vars.is_empty());
    }

    #[test]
    fn loops_are_nested_and_recorded() {
        let mut builder = IrBuilder::new("test");
        let mut inner = None;
        let outer = builder.for_loop("i", 0, 4, LoopKind::Parallel { num_threads: 4 }, |b, i| {
            let doubled = b.var_init("doubled", &i * 2);
            inner = Some(b.for_loop("j", 0, doubled, LoopKind::Serial, |b, _| {
                b.comment("body");
            }));
        });
        let inner = inner.unwrap();
        builder.loop_attrs_mut(inner).reduce_root = Some(outer);
        let kernel = builder.build();

        assert_eq!(kernel.loops.len(), 2);
        assert_eq!(kernel.loop_node(inner).attrs.reduce_root, Some(outer));
        assert!(kernel.loop_node(outer).kind.is_parallel());

        let mut count = 0;
        kernel.walk(&mut |_| count += 1);
        // for i, let doubled, for j, comment
        assert_eq!(count, 4);
    }

    #[test]
    fn constant_conditions_are_resolved() {
        let mut builder = IrBuilder::new("test");
        builder.if_then(Expr::from(1).lt(0), |b| b.comment("dead"));
        builder.if_then(Expr::from(0).lt(1), |b| b.comment("live"));
        let mut branch = Vec::new();
        builder.if_then_else(
            Expr::Var(VarId(0)),
            &mut branch,
            |b, branch| {
                branch.push("then");
                b.comment("then");
            },
            |b, branch| {
                branch.push("else");
                b.comment("else");
            },
        );
        let kernel = builder.build();

        assert_eq!(branch, vec!["then", "else"]);
        assert_eq!(kernel.body.stmts[0], Stmt::Comment("live".into()));
        assert!(matches!(kernel.body.stmts[1], Stmt::If { .. }));
    }

    #[test]
    fn single_variant_anchor_has_no_selector() {
        let mut builder = IrBuilder::new("test");
        let c = builder.declare_tensor("c", ElemType::F32, vec![4, 4], TensorKind::Output);
        let region = AnchorRegion::new(vec![
            crate::DimRange::new(0.into(), 4.into()),
            crate::DimRange::new(0.into(), 4.into()),
        ]);
        builder.anchor(AnchorScope::Team, c, vec![region], Expr::ThreadId);
        let kernel = builder.build();

        assert_eq!(kernel.anchors.len(), 1);
        assert!(kernel.anchors[0].selector.is_none());
        assert!(!kernel.anchors[0].is_conditional());
    }
}
