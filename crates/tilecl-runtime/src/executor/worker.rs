use core::sync::atomic::{AtomicUsize, Ordering};

use tilecl_ir::{
    Block, BrgemmCall, Expr, ExprEnv, ForLoop, Kernel, LoopKind, Stmt, TensorPtr, VarId,
};

use crate::{
    AnchorEvent, AnchorObserver, BrgemmArgs, ExecutionError, MicroKernel, ResolvedRange,
    SharedBuffer,
};

/// State shared by all the workers of one execution.
pub(crate) struct ExecutionContext<'a> {
    pub kernel: &'a Kernel,
    pub buffers: Vec<SharedBuffer>,
    pub strides: Vec<Vec<usize>>,
    pub micro_kernel: &'a dyn MicroKernel,
    pub observer: &'a dyn AnchorObserver,
    pub brgemm_calls: AtomicUsize,
    pub anchors: AtomicUsize,
    pub forks: AtomicUsize,
}

/// State private to one worker.
///
/// A worker owns the thread ids `thread_id..thread_id + budget`. When it reaches a parallel loop,
/// it splits that range between the workers it forks.
#[derive(Clone, Debug)]
pub(crate) struct WorkerState {
    env: Vec<Option<i64>>,
    thread_id: usize,
    budget: usize,
}

impl ExprEnv for WorkerState {
    fn var(&self, id: VarId) -> Option<i64> {
        self.env.get(id.index()).copied().flatten()
    }

    fn thread_id(&self) -> i64 {
        self.thread_id as i64
    }
}

impl WorkerState {
    pub fn root(num_vars: usize, budget: usize) -> Self {
        Self {
            env: vec![None; num_vars],
            thread_id: 0,
            budget: budget.max(1),
        }
    }

    fn set(&mut self, var: VarId, value: i64) {
        self.env[var.index()] = Some(value);
    }

    fn eval(&self, expr: &Expr) -> Result<i64, ExecutionError> {
        Ok(expr.eval(self)?)
    }

    pub fn run_block(
        &mut self,
        ctx: &ExecutionContext<'_>,
        block: &Block,
    ) -> Result<(), ExecutionError> {
        for stmt in block.stmts.iter() {
            self.run_stmt(ctx, stmt)?;
        }
        Ok(())
    }

    fn run_stmt(&mut self, ctx: &ExecutionContext<'_>, stmt: &Stmt) -> Result<(), ExecutionError> {
        match stmt {
            Stmt::Let { var, value } => {
                let value = self.eval(value)?;
                self.set(*var, value);
            }
            Stmt::For(for_loop) => self.run_loop(ctx, for_loop)?,
            Stmt::If {
                cond,
                then,
                or_else,
            } => {
                if self.eval(cond)? != 0 {
                    self.run_block(ctx, then)?;
                } else if let Some(or_else) = or_else {
                    self.run_block(ctx, or_else)?;
                }
            }
            Stmt::Brgemm(call) => self.run_brgemm(ctx, call)?,
            Stmt::MemZero { dst, len } => {
                let len = self.eval_len(len)?;
                let (buffer, offset) = self.resolve(ctx, dst, len)?;
                buffer.fill_zero(offset, len);
            }
            Stmt::Accumulate { dst, src, len } => {
                let len = self.eval_len(len)?;
                let (dst, dst_offset) = self.resolve(ctx, dst, len)?;
                let (src, src_offset) = self.resolve(ctx, src, len)?;
                dst.accumulate(dst_offset, src, src_offset, len);
            }
            Stmt::Anchor(id) => {
                let anchor = ctx.kernel.anchor(*id);
                let variant = match &anchor.selector {
                    Some(selector) => self.eval(selector)?,
                    None => 0,
                };
                let region = usize::try_from(variant)
                    .ok()
                    .and_then(|variant| anchor.variants.get(variant))
                    .ok_or(ExecutionError::InvalidAnchorSelector {
                        anchor: id.0,
                        selected: variant,
                        variants: anchor.variants.len(),
                    })?;
                let ranges = region
                    .ranges
                    .iter()
                    .map(|range| -> Result<ResolvedRange, ExecutionError> {
                        Ok(ResolvedRange::new(
                            self.eval(&range.offset)?,
                            self.eval(&range.len)?,
                        ))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                ctx.anchors.fetch_add(1, Ordering::Relaxed);
                ctx.observer.on_anchor(AnchorEvent {
                    anchor: *id,
                    scope: anchor.scope,
                    tensor: ctx.kernel.tensor(anchor.tensor).name.clone(),
                    variant: variant as usize,
                    ranges,
                    worker: self.thread_id,
                });
            }
            Stmt::Comment(_) => {}
        }

        Ok(())
    }

    fn run_loop(
        &mut self,
        ctx: &ExecutionContext<'_>,
        for_loop: &ForLoop,
    ) -> Result<(), ExecutionError> {
        let start = self.eval(&for_loop.start)?;
        let end = self.eval(&for_loop.end)?;
        let iterations = (end - start).max(0) as usize;

        let workers = match for_loop.kind {
            LoopKind::Serial => 1,
            LoopKind::Parallel { .. } => iterations.min(self.budget),
        };

        if workers <= 1 {
            for i in start..end {
                self.set(for_loop.var, i);
                self.run_block(ctx, &for_loop.body)?;
            }
            return Ok(());
        }

        ctx.forks.fetch_add(1, Ordering::Relaxed);
        let chunk = iterations.div_ceil(workers);
        let child_budget = self.budget / workers;

        let results = std::thread::scope(|scope| {
            let handles = (0..workers)
                .map(|w| {
                    let mut state = WorkerState {
                        env: self.env.clone(),
                        thread_id: self.thread_id + w * child_budget,
                        budget: child_budget,
                    };
                    let first = start + (w * chunk) as i64;
                    let last = (first + chunk as i64).min(end);

                    scope.spawn(move || -> Result<(), ExecutionError> {
                        log::trace!(
                            "Worker {} runs iterations {first}..{last}",
                            state.thread_id
                        );
                        for i in first..last {
                            state.set(for_loop.var, i);
                            state.run_block(ctx, &for_loop.body)?;
                        }
                        Ok(())
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(Err(ExecutionError::WorkerPanicked)))
                .collect::<Vec<_>>()
        });

        results.into_iter().collect()
    }

    fn run_brgemm(
        &mut self,
        ctx: &ExecutionContext<'_>,
        call: &BrgemmCall,
    ) -> Result<(), ExecutionError> {
        let batch = self.eval_len(&call.batch)?;
        let (a, a_offset) = self.resolve(ctx, &call.a, 0)?;
        let (b, b_offset) = self.resolve(ctx, &call.b, 0)?;
        let (c, c_offset) = self.resolve(ctx, &call.c, 0)?;

        let args = BrgemmArgs {
            a,
            a_offset,
            b,
            b_offset,
            c,
            c_offset,
            batch,
            m: call.m,
            n: call.n,
            k: call.k,
            lda: call.lda,
            ldb: call.ldb,
            ldc: call.ldc,
            stride_a: call.stride_a,
            stride_b: call.stride_b,
            b_pack: call.b_pack,
            mode: call.mode,
        };

        self.resolve(ctx, &call.a, args.a_extent())?;
        self.resolve(ctx, &call.b, args.b_extent())?;
        self.resolve(ctx, &call.c, args.c_extent())?;

        ctx.brgemm_calls.fetch_add(1, Ordering::Relaxed);
        ctx.micro_kernel.brgemm(&args);

        Ok(())
    }

    fn eval_len(&self, len: &Expr) -> Result<usize, ExecutionError> {
        let len = self.eval(len)?;
        Ok(len.max(0) as usize)
    }

    /// Buffer and linear offset addressed by a pointer, checking that `len` elements fit.
    fn resolve<'c>(
        &self,
        ctx: &'c ExecutionContext<'_>,
        ptr: &TensorPtr,
        len: usize,
    ) -> Result<(&'c SharedBuffer, usize), ExecutionError> {
        let id = ptr.tensor.0 as usize;
        let buffer = &ctx.buffers[id];
        let strides = &ctx.strides[id];

        let mut offset = 0i64;
        for (index, stride) in ptr.index.iter().zip(strides.iter()) {
            offset += self.eval(index)? * *stride as i64;
        }

        let in_bounds = ptr.index.len() == strides.len()
            && offset >= 0
            && offset as usize + len <= buffer.len()
            && (len > 0 || (offset as usize) < buffer.len().max(1));

        match in_bounds {
            true => Ok((buffer, offset as usize)),
            false => Err(ExecutionError::OutOfBounds {
                tensor: ctx.kernel.tensor(ptr.tensor).name.clone(),
                offset,
                len,
                size: buffer.len(),
            }),
        }
    }
}
