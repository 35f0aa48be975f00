use core::fmt::{Display, Formatter, Result};

use crate::{
    AnchorRegion, Block, BrgemmMode, Expr, Kernel, LoopKind, Stmt, TensorKind, TensorPtr, VarId,
};

struct ExprDisplay<'a> {
    expr: &'a Expr,
    kernel: &'a Kernel,
}

impl Kernel {
    fn show<'a>(&'a self, expr: &'a Expr) -> ExprDisplay<'a> {
        ExprDisplay { expr, kernel: self }
    }

    fn var_label(&self, var: VarId) -> String {
        format!("{}.{}", self.var_name(var), var.0)
    }

    fn fmt_ptr(&self, f: &mut Formatter<'_>, ptr: &TensorPtr) -> Result {
        write!(f, "&{}[", self.tensor(ptr.tensor).name)?;
        for (i, index) in ptr.index.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", self.show(index))?;
        }
        f.write_str("]")
    }

    fn fmt_region(&self, f: &mut Formatter<'_>, region: &AnchorRegion) -> Result {
        f.write_str("[")?;
        for (i, range) in region.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} +{}", self.show(&range.offset), self.show(&range.len))?;
        }
        f.write_str("]")
    }

    fn fmt_block(&self, f: &mut Formatter<'_>, block: &Block, depth: usize) -> Result {
        for stmt in block.stmts.iter() {
            self.fmt_stmt(f, stmt, depth)?;
        }
        Ok(())
    }

    fn fmt_stmt(&self, f: &mut Formatter<'_>, stmt: &Stmt, depth: usize) -> Result {
        let indent = "    ".repeat(depth);

        match stmt {
            Stmt::Let { var, value } => {
                writeln!(f, "{indent}let {} = {};", self.var_label(*var), self.show(value))
            }
            Stmt::For(for_loop) => {
                let node = self.loop_node(for_loop.id);
                write!(f, "{indent}")?;
                if let LoopKind::Parallel { num_threads } = for_loop.kind {
                    write!(f, "parallel({num_threads}) ")?;
                }
                write!(
                    f,
                    "for {} in {}..{}",
                    self.var_label(for_loop.var),
                    self.show(&for_loop.start),
                    self.show(&for_loop.end)
                )?;
                if node.attrs.parallel_merge {
                    f.write_str(" #merge")?;
                    if let Some(granularity) = node.attrs.merge_granularity {
                        write!(f, "({granularity})")?;
                    }
                }
                if let Some(root) = node.attrs.reduce_root {
                    let root = self.loop_node(root);
                    write!(f, " #reduce_root({})", self.var_label(root.var))?;
                }
                f.write_str(" {\n")?;
                self.fmt_block(f, &for_loop.body, depth + 1)?;
                writeln!(f, "{indent}}}")
            }
            Stmt::If {
                cond,
                then,
                or_else,
            } => {
                writeln!(f, "{indent}if {} {{", self.show(cond))?;
                self.fmt_block(f, then, depth + 1)?;
                if let Some(or_else) = or_else {
                    writeln!(f, "{indent}}} else {{")?;
                    self.fmt_block(f, or_else, depth + 1)?;
                }
                writeln!(f, "{indent}}}")
            }
            Stmt::Brgemm(call) => {
                let name = match call.mode {
                    BrgemmMode::Init => "brgemm_init",
                    BrgemmMode::Update => "brgemm_update",
                };
                write!(f, "{indent}{name}(")?;
                self.fmt_ptr(f, &call.a)?;
                f.write_str(", ")?;
                self.fmt_ptr(f, &call.b)?;
                f.write_str(", ")?;
                self.fmt_ptr(f, &call.c)?;
                writeln!(
                    f,
                    ", batch={}, m={}, n={}, k={}, ld=({}, {}, {}), stride=({}, {}), {}x{}/{});",
                    self.show(&call.batch),
                    call.m,
                    call.n,
                    call.k,
                    call.lda,
                    call.ldb,
                    call.ldc,
                    call.stride_a,
                    call.stride_b,
                    call.a_elem,
                    call.b_elem,
                    call.b_pack,
                )
            }
            Stmt::MemZero { dst, len } => {
                write!(f, "{indent}zero(")?;
                self.fmt_ptr(f, dst)?;
                writeln!(f, ", {});", self.show(len))
            }
            Stmt::Accumulate { dst, src, len } => {
                write!(f, "{indent}accumulate(")?;
                self.fmt_ptr(f, dst)?;
                f.write_str(", ")?;
                self.fmt_ptr(f, src)?;
                writeln!(f, ", {});", self.show(len))
            }
            Stmt::Anchor(id) => {
                let anchor = self.anchor(*id);
                write!(
                    f,
                    "{indent}anchor#{} {} {}",
                    id.0,
                    anchor.scope,
                    self.tensor(anchor.tensor).name
                )?;
                if let Some(selector) = &anchor.selector {
                    write!(f, " select {}", self.show(selector))?;
                }
                f.write_str(" {\n")?;
                for (i, region) in anchor.variants.iter().enumerate() {
                    write!(f, "{indent}    {i}: ")?;
                    self.fmt_region(f, region)?;
                    f.write_str("\n")?;
                }
                writeln!(f, "{indent}}}")
            }
            Stmt::Comment(text) => writeln!(f, "{indent}// {text}"),
        }
    }
}

impl Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self.expr {
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Var(var) => f.write_str(&self.kernel.var_label(*var)),
            Expr::ThreadId => f.write_str("thread_id"),
            Expr::Binary { op, lhs, rhs } => match op {
                crate::BinaryOp::Min | crate::BinaryOp::Max => write!(
                    f,
                    "{}({}, {})",
                    op.symbol(),
                    self.kernel.show(lhs),
                    self.kernel.show(rhs)
                ),
                _ => write!(
                    f,
                    "({} {} {})",
                    self.kernel.show(lhs),
                    op.symbol(),
                    self.kernel.show(rhs)
                ),
            },
            Expr::Compare { op, lhs, rhs } => write!(
                f,
                "({} {} {})",
                self.kernel.show(lhs),
                op.symbol(),
                self.kernel.show(rhs)
            ),
            Expr::Select {
                cond,
                then,
                or_else,
            } => write!(
                f,
                "({} ? {} : {})",
                self.kernel.show(cond),
                self.kernel.show(then),
                self.kernel.show(or_else)
            ),
        }
    }
}

impl Display for Kernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "kernel {} {{", self.name)?;
        for tensor in self.tensors.iter() {
            let kind = match tensor.kind {
                TensorKind::Input => "input",
                TensorKind::Output => "output",
                TensorKind::Temporary => "temp",
            };
            writeln!(
                f,
                "    {kind} {}: {}{:?};",
                tensor.name, tensor.elem, tensor.shape
            )?;
        }
        self.fmt_block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}
