mod worker;

use core::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tilecl_ir::{Kernel, TensorKind};
use worker::{ExecutionContext, WorkerState};

use crate::{
    config::Logger, AnchorObserver, Bindings, ExecutionError, MicroKernel, SharedBuffer,
};

/// Runs generated kernels on the CPU.
///
/// Parallel loops fork a scoped thread per worker and join them at the end of the loop.
/// Iterations are chunked evenly between at most `num_threads` workers; a worker reaching a nested
/// parallel loop shares its own thread budget between the workers it forks. Temporary tensors
/// are allocated for each execution and dropped when it completes.
#[derive(Debug)]
pub struct Executor {
    num_threads: usize,
    logger: spin::Mutex<Logger>,
}

/// Counters collected during an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionStats {
    /// Number of micro-kernel calls.
    pub brgemm_calls: usize,
    /// Number of anchors reached.
    pub anchors: usize,
    /// Number of parallel loops that forked workers.
    pub forks: usize,
}

impl Executor {
    /// Create an executor using at most `num_threads` concurrent workers.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            logger: spin::Mutex::new(Logger::new()),
        }
    }

    /// Maximum number of concurrent workers.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Execute a kernel.
    ///
    /// Every input and output tensor of the kernel must have a buffer of the declared size in
    /// `bindings`. Micro-kernel calls are checked against the bounds of their operands before being
    /// forwarded to `micro_kernel`, and every anchor reached is reported to `observer`.
    pub fn execute(
        &self,
        kernel: &Kernel,
        bindings: &Bindings,
        micro_kernel: &dyn MicroKernel,
        observer: &dyn AnchorObserver,
    ) -> Result<ExecutionStats, ExecutionError> {
        let mut buffers = Vec::with_capacity(kernel.tensors.len());

        for tensor in kernel.tensors.iter() {
            let buffer = match tensor.kind {
                TensorKind::Input | TensorKind::Output => {
                    let buffer = bindings.get(&tensor.name).ok_or_else(|| {
                        ExecutionError::MissingBinding {
                            tensor: tensor.name.clone(),
                        }
                    })?;

                    if buffer.len() != tensor.len() {
                        return Err(ExecutionError::BindingSize {
                            tensor: tensor.name.clone(),
                            expected: tensor.len(),
                            actual: buffer.len(),
                        });
                    }
                    if buffer.elem() != tensor.elem {
                        log::warn!(
                            "Tensor {} is declared as {} but bound to a {} buffer",
                            tensor.name,
                            tensor.elem,
                            buffer.elem()
                        );
                    }
                    buffer.clone()
                }
                TensorKind::Temporary => SharedBuffer::zeros(tensor.elem, tensor.len()),
            };
            buffers.push(buffer);
        }

        let ctx = ExecutionContext {
            kernel,
            strides: kernel.tensors.iter().map(|tensor| tensor.strides()).collect(),
            buffers,
            micro_kernel,
            observer,
            brgemm_calls: AtomicUsize::new(0),
            anchors: AtomicUsize::new(0),
            forks: AtomicUsize::new(0),
        };

        log::debug!(
            "Executing kernel {} with {} threads",
            kernel.name,
            self.num_threads
        );
        let start = Instant::now();

        WorkerState::root(kernel.vars.len(), self.num_threads).run_block(&ctx, &kernel.body)?;

        let stats = ExecutionStats {
            brgemm_calls: ctx.brgemm_calls.load(Ordering::Relaxed),
            anchors: ctx.anchors.load(Ordering::Relaxed),
            forks: ctx.forks.load(Ordering::Relaxed),
        };

        let mut logger = self.logger.lock();
        if logger.execution_enabled() {
            logger.log_execution(&format!(
                "Executed kernel {} on {} threads in {:?}: {} brgemm calls, {} anchors, {} forks",
                kernel.name,
                self.num_threads,
                start.elapsed(),
                stats.brgemm_calls,
                stats.anchors,
                stats.forks,
            ));
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AnchorLog, NoopObserver, ReferenceBrgemm};
    use tilecl_ir::{
        AnchorRegion, AnchorScope, DimRange, ElemType, Expr, IrBuilder, LoopKind, TensorPtr,
    };

    #[test]
    fn parallel_loops_write_disjoint_elements() {
        let mut builder = IrBuilder::new("fill");
        let dst = builder.declare_tensor("dst", ElemType::F32, vec![64], TensorKind::Output);
        let src = builder.declare_tensor("src", ElemType::F32, vec![64], TensorKind::Input);
        builder.for_loop("i", 0, 8, LoopKind::Parallel { num_threads: 4 }, |b, i| {
            b.for_loop("j", 0, 2, LoopKind::Parallel { num_threads: 2 }, |b, j| {
                let offset = b.var_init("offset", &i * 8 + &j * 4);
                let ptr = TensorPtr::new(dst, vec![offset.clone()]);
                b.accumulate(ptr, TensorPtr::new(src, vec![offset]), 4);
            });
        });
        let kernel = builder.build();

        let src_values = (0..64).map(|i| i as f32).collect::<Vec<_>>();
        let bindings = Bindings::new()
            .with("dst", SharedBuffer::from_f32(ElemType::F32, &[1.0; 64]))
            .with("src", SharedBuffer::from_f32(ElemType::F32, &src_values));

        let stats = Executor::new(4)
            .execute(&kernel, &bindings, &ReferenceBrgemm, &NoopObserver)
            .unwrap();

        let expected = (0..64).map(|i| i as f32 + 1.0).collect::<Vec<_>>();
        assert_eq!(bindings.get("dst").unwrap().to_f32_vec(), expected);
        assert!(stats.forks >= 1);
    }

    #[test]
    fn thread_ids_are_unique_per_worker() {
        let mut builder = IrBuilder::new("ids");
        let dst = builder.declare_tensor("dst", ElemType::F32, vec![4], TensorKind::Output);
        builder.for_loop("i", 0, 4, LoopKind::Parallel { num_threads: 4 }, |b, i| {
            let region = AnchorRegion::new(vec![DimRange::new(i, 1.into())]);
            b.anchor(AnchorScope::Tile, dst, vec![region], Expr::from(0));
        });
        let kernel = builder.build();
        let bindings = Bindings::new().with("dst", SharedBuffer::zeros(ElemType::F32, 4));
        let log = AnchorLog::new();

        Executor::new(4)
            .execute(&kernel, &bindings, &ReferenceBrgemm, &log)
            .unwrap();

        let mut workers = log.take().iter().map(|event| event.worker).collect::<Vec<_>>();
        workers.sort();
        assert_eq!(workers, vec![0, 1, 2, 3]);
    }

    #[test]
    fn out_of_bounds_access_is_reported() {
        let mut builder = IrBuilder::new("oob");
        let dst = builder.declare_tensor("dst", ElemType::F32, vec![4], TensorKind::Output);
        builder.mem_zero(TensorPtr::new(dst, vec![Expr::from(2)]), 4);
        let kernel = builder.build();
        let bindings = Bindings::new().with("dst", SharedBuffer::zeros(ElemType::F32, 4));

        let result = Executor::new(1).execute(&kernel, &bindings, &ReferenceBrgemm, &NoopObserver);

        assert!(matches!(
            result,
            Err(ExecutionError::OutOfBounds { offset: 2, len: 4, .. })
        ));
    }

    #[test]
    fn missing_binding_is_reported() {
        let mut builder = IrBuilder::new("missing");
        builder.declare_tensor("dst", ElemType::F32, vec![4], TensorKind::Output);
        let kernel = builder.build();

        let result =
            Executor::new(1).execute(&kernel, &Bindings::new(), &ReferenceBrgemm, &NoopObserver);

        assert!(matches!(result, Err(ExecutionError::MissingBinding { .. })));
    }
}
