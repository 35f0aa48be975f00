#![allow(dead_code)]

use rand::{rngs::StdRng, Rng, SeedableRng};
use tilecl_ir::{ElemType, Kernel};
use tilecl_matmul::{
    kernels::managed::{MatmulLayout, LHS, OUT, RHS},
    MatmulPlan, MatmulProblem, MatrixLayout, ResolvedProblem,
};
use tilecl_runtime::{
    AnchorObserver, Bindings, ExecutionStats, Executor, ReferenceBrgemm, SharedBuffer,
};

/// Inputs of a matmul, row-major and unpadded.
pub struct MatmulTestCase {
    pub problem: MatmulProblem,
    pub lhs: Vec<f32>,
    pub rhs: Vec<f32>,
}

impl MatmulTestCase {
    /// Small integer inputs, exact in every supported element type.
    pub fn random(problem: MatmulProblem, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let lhs_range = match problem.elems.lhs {
            ElemType::U8 => 0i32..=4,
            _ => -4..=4,
        };

        let lhs = (0..problem.m * problem.k)
            .map(|_| rng.random_range(lhs_range.clone()) as f32)
            .collect();
        let rhs = (0..problem.k * problem.n)
            .map(|_| rng.random_range(-4i32..=4) as f32)
            .collect();

        Self { problem, lhs, rhs }
    }

    /// Naive triple loop over the unpadded extents.
    pub fn reference(&self) -> Vec<f32> {
        let MatmulProblem { m, n, k, .. } = self.problem;
        let mut out = vec![0.0; m * n];

        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for l in 0..k {
                    acc += self.lhs[i * k + l] * self.rhs[l * n + j];
                }
                out[i * n + j] = acc;
            }
        }

        out
    }

    /// Buffers for the tensors of a kernel generated for `problem`, padded with zeros and laid out
    /// as the kernel expects.
    pub fn bindings(&self, problem: &ResolvedProblem) -> Bindings {
        let layout = MatmulLayout::new(problem);
        let MatmulProblem { m, n, k, elems, .. } = self.problem;

        let mut lhs = vec![0.0; layout.m * layout.k];
        for i in 0..m {
            for l in 0..k {
                lhs[lhs_index(&layout, i, l)] = self.lhs[i * k + l];
            }
        }

        let mut rhs = vec![0.0; layout.k * layout.n];
        for l in 0..k {
            for j in 0..n {
                rhs[rhs_index(&layout, l, j)] = self.rhs[l * n + j];
            }
        }

        Bindings::new()
            .with(LHS, SharedBuffer::from_f32(elems.lhs, &lhs))
            .with(RHS, SharedBuffer::from_f32(elems.rhs, &rhs))
            .with(OUT, SharedBuffer::zeros(elems.out, layout.m * layout.n))
    }

    /// Unpadded row-major output read back from the bindings.
    pub fn output(&self, problem: &ResolvedProblem, bindings: &Bindings) -> Vec<f32> {
        let layout = MatmulLayout::new(problem);
        let MatmulProblem { m, n, .. } = self.problem;
        let out = bindings.get(OUT).expect("Output should be bound");

        let mut values = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                values[i * n + j] = out.load_f32(out_index(&layout, i, j));
            }
        }
        values
    }

    /// Run a kernel generated for `problem` with the reference micro-kernel and return the
    /// unpadded output.
    pub fn execute(
        &self,
        problem: &ResolvedProblem,
        kernel: &Kernel,
        num_threads: usize,
        observer: &dyn AnchorObserver,
    ) -> (Vec<f32>, ExecutionStats) {
        let bindings = self.bindings(problem);
        let stats = Executor::new(num_threads)
            .execute(kernel, &bindings, &ReferenceBrgemm, observer)
            .expect("Kernel should execute");

        (self.output(problem, &bindings), stats)
    }

    /// Run a plan with as many workers as it was planned for.
    pub fn execute_plan(
        &self,
        plan: &MatmulPlan,
        observer: &dyn AnchorObserver,
    ) -> (Vec<f32>, ExecutionStats) {
        self.execute(&plan.problem, &plan.kernel, plan.config.num_threads, observer)
    }
}

/// Position of lhs element `(i, l)`.
pub fn lhs_index(layout: &MatmulLayout, i: usize, l: usize) -> usize {
    let (iim, iik) = (layout.blocks.m, layout.blocks.k);

    match layout.lhs {
        MatrixLayout::Plain => i * layout.k + l,
        MatrixLayout::Blocked => {
            ((i / iim * (layout.k / iik) + l / iik) * iim + i % iim) * iik + l % iik
        }
    }
}

/// Position of rhs element `(l, j)`, interleaving `dtype_block` reduction elements when packed.
pub fn rhs_index(layout: &MatmulLayout, l: usize, j: usize) -> usize {
    let (iin, iik, db) = (layout.blocks.n, layout.blocks.k, layout.dtype_block);

    match layout.rhs {
        MatrixLayout::Plain => l * layout.n + j,
        MatrixLayout::Blocked => {
            let tile = j / iin * (layout.k / iik) + l / iik;
            ((tile * (iik / db) + l % iik / db) * iin + j % iin) * db + l % db
        }
    }
}

/// Position of output element `(i, j)`.
pub fn out_index(layout: &MatmulLayout, i: usize, j: usize) -> usize {
    let (iim, iin) = (layout.blocks.m, layout.blocks.n);

    match layout.out {
        MatrixLayout::Plain => i * layout.n + j,
        MatrixLayout::Blocked => {
            ((i / iim * (layout.n / iin) + j / iin) * iim + i % iim) * iin + j % iin
        }
    }
}

/// Compares two outputs element-wise, with an error relative to the magnitude of the expected
/// value.
pub fn assert_equals_approx(actual: &[f32], expected: &[f32], epsilon: f32) -> Result<(), String> {
    if actual.len() != expected.len() {
        return Err(format!(
            "Lengths differ: actual={}, expected={}",
            actual.len(),
            expected.len()
        ));
    }

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        let tolerance = epsilon * e.abs().max(1.0);
        if (a - e).abs() > tolerance {
            return Err(format!(
                "Values differ more than epsilon: index={i} actual={a}, expected={e}, difference={}, epsilon={epsilon}",
                (a - e).abs(),
            ));
        }
    }

    Ok(())
}
