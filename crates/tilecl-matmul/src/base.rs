use tilecl_ir::{FusionManager, Kernel, TensorId};
use tilecl_runtime::{config::Logger, HardwareContext};

use crate::{
    cache::{PlanCache, PlanKey},
    components::{
        resolve_block_sizes, select_tiling, BlockSizes, CostModel, MatmulProblem, MatmulSetupError,
        ResolvedProblem, TilingConfig,
    },
    kernels::managed::{self, LHS, OUT, PARTIAL, RHS},
};

/// Handles of the tensors of a planned kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulTensors {
    pub lhs: TensorId,
    pub rhs: TensorId,
    pub out: TensorId,
    /// Partial sums buffer, only present when K is split between teams.
    pub partial: Option<TensorId>,
}

/// A generated matmul kernel and the decisions it was generated from.
#[derive(Debug, Clone)]
pub struct MatmulPlan {
    pub problem: ResolvedProblem,
    pub block_sizes: BlockSizes,
    pub config: TilingConfig,
    pub kernel: Kernel,
    pub tensors: MatmulTensors,
}

impl MatmulPlan {
    /// Whether K is split between thread teams, which adds a reduction pass.
    pub fn splits_k(&self) -> bool {
        self.tensors.partial.is_some()
    }
}

/// Plans matmul kernels for a hardware context.
///
/// Block sizes and tiling are memoized per problem in a [plan cache](PlanCache), the kernel is
/// generated on every call.
pub struct MatmulPlanner {
    hw: HardwareContext,
    cost_model: CostModel,
    cache: &'static PlanCache,
    logger: Logger,
}

impl MatmulPlanner {
    pub fn new(hw: HardwareContext) -> Self {
        Self {
            hw,
            cost_model: CostModel::default(),
            cache: PlanCache::global(),
            logger: Logger::new(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = cost_model;
        self
    }

    /// Use another cache than the process-wide one.
    pub fn with_cache(mut self, cache: &'static PlanCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn hardware(&self) -> &HardwareContext {
        &self.hw
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    /// Block sizes and tiling of a problem, from the cache when possible.
    pub fn select(
        &self,
        problem: &MatmulProblem,
    ) -> Result<(ResolvedProblem, TilingConfig), MatmulSetupError> {
        problem.validate()?;

        let key = PlanKey::new(problem.clone(), self.hw, self.cost_model.clone());
        let (block_sizes, config) = self.cache.get_or_try_insert(&key, || {
            let block_sizes = resolve_block_sizes(problem, &self.hw);
            let resolved = ResolvedProblem::new(problem.clone(), block_sizes)?;
            let config = select_tiling(&resolved, &self.hw, &self.cost_model);

            Ok::<_, MatmulSetupError>((block_sizes, config))
        })?;

        let resolved = ResolvedProblem::new(problem.clone(), block_sizes)?;
        Ok((resolved, config))
    }

    /// Plan a problem, without fusion.
    pub fn plan(&mut self, problem: &MatmulProblem) -> Result<MatmulPlan, MatmulSetupError> {
        self.plan_fused(problem, None)
    }

    /// Plan a problem, registering the anchors of the kernel with `fusion`.
    pub fn plan_fused(
        &mut self,
        problem: &MatmulProblem,
        fusion: Option<&mut dyn FusionManager>,
    ) -> Result<MatmulPlan, MatmulSetupError> {
        let (resolved, config) = self.select(problem)?;
        let kernel = managed::generate(&resolved, &config, &self.hw, fusion)?;

        if self.logger.compilation_enabled() {
            self.logger.log_compilation(&format!(
                "[{} GFLOP] {} with blocks {} and {config}\n{kernel}",
                problem.gflop(),
                kernel.name,
                resolved.blocks,
            ));
        }

        let tensor = |name: &str| {
            kernel.find_tensor(name).map(|tensor| tensor.id).ok_or_else(|| {
                MatmulSetupError::InvalidConfig(Box::new(format!(
                    "Generated kernel has no tensor {name}"
                )))
            })
        };
        let tensors = MatmulTensors {
            lhs: tensor(LHS)?,
            rhs: tensor(RHS)?,
            out: tensor(OUT)?,
            partial: kernel.find_tensor(PARTIAL).map(|tensor| tensor.id),
        };

        Ok(MatmulPlan {
            block_sizes: resolved.blocks,
            problem: resolved,
            config,
            kernel,
            tensors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{MatmulElems, MatmulUnsupportedError, MatrixLayout};
    use tilecl_ir::ElemType;

    static CACHE: PlanCache = PlanCache::new();

    #[test]
    fn plans_are_cached() {
        let hw = HardwareContext::new(3, 1024 * 1024);
        let mut planner = MatmulPlanner::new(hw).with_cache(&CACHE);
        let problem = MatmulProblem::new(97, 53, 31, MatmulElems::f32());

        let first = planner.plan(&problem).unwrap();
        let second = planner.plan(&problem).unwrap();

        assert_eq!(first.config, second.config);
        assert_eq!(first.kernel, second.kernel);
        assert!(CACHE
            .get(&PlanKey::new(problem, hw, CostModel::default()))
            .is_some());
    }

    #[test]
    fn tensors_are_found() {
        let mut planner =
            MatmulPlanner::new(HardwareContext::new(4, 1024 * 1024)).with_cache(&CACHE);
        let problem = MatmulProblem::new(130, 70, 8300, MatmulElems::f32())
            .with_block_sizes(BlockSizes::new(16, 16, 16));

        let plan = planner.plan(&problem).unwrap();

        assert!(plan.splits_k());
        assert_eq!(plan.kernel.tensor(plan.tensors.out).name, OUT);
        assert_eq!(
            plan.kernel.tensor(plan.tensors.partial.unwrap()).elem,
            ElemType::F32
        );
    }

    #[test]
    fn unsupported_problems_are_rejected() {
        let mut planner =
            MatmulPlanner::new(HardwareContext::new(4, 1024 * 1024)).with_cache(&CACHE);
        let problem = MatmulProblem::new(64, 64, 64, MatmulElems::s8s8());

        assert!(matches!(
            planner.plan(&problem),
            Err(MatmulSetupError::Unsupported(
                MatmulUnsupportedError::RhsLayout {
                    layout: MatrixLayout::Plain,
                    ..
                }
            ))
        ));
    }
}
