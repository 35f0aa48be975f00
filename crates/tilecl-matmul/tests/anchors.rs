mod common;

use std::collections::HashSet;

use common::{assert_equals_approx, MatmulTestCase};
use pretty_assertions::assert_eq;
use tilecl_ir::{AnchorRecorder, AnchorScope, Kernel};
use tilecl_matmul::{
    generate, BlockSizes, LoopOrder, MatmulElems, MatmulPlanner, MatmulProblem, MatrixLayout,
    ResolvedProblem, TilingConfig,
};
use tilecl_runtime::{AnchorEvent, AnchorLog, HardwareContext};

const L2: usize = 1024 * 1024;

fn resolved(m: usize, n: usize, k: usize, out: MatrixLayout) -> ResolvedProblem {
    let problem = MatmulProblem::new(m, n, k, MatmulElems::f32())
        .with_layouts(MatrixLayout::Plain, MatrixLayout::Plain, out)
        .with_block_sizes(BlockSizes::new(16, 16, 16));
    ResolvedProblem::new(problem, BlockSizes::new(16, 16, 16)).unwrap()
}

fn config(m_split: usize, n_split: usize, subs: (usize, usize, usize)) -> TilingConfig {
    TilingConfig {
        m_split_num: m_split,
        n_split_num: n_split,
        m_sub_block: subs.0,
        n_sub_block: subs.1,
        k_sub_block: subs.2,
        num_threads: 4,
        loop_order: LoopOrder::MFirst,
    }
}

/// Number of times every element of the padded output is marked ready by anchors of `scope`.
fn coverage(problem: &ResolvedProblem, events: &[AnchorEvent], scope: AnchorScope) -> Vec<usize> {
    let iim = problem.blocks.m as i64;
    let iin = problem.blocks.n as i64;
    let mut counts = vec![0; problem.m * problem.n];

    for event in events.iter().filter(|event| event.scope == scope) {
        let (rows, cols) = match problem.problem.out_layout {
            MatrixLayout::Plain => (event.ranges[0], event.ranges[1]),
            MatrixLayout::Blocked => {
                // Whole tiles: the inner ranges span a tile.
                assert_eq!((event.ranges[2].len, event.ranges[3].len), (iim, iin));
                let mut rows = event.ranges[0];
                let mut cols = event.ranges[1];
                rows.offset *= iim;
                rows.len *= iim;
                cols.offset *= iin;
                cols.len *= iin;
                (rows, cols)
            }
        };

        for i in rows.offset..rows.offset + rows.len {
            for j in cols.offset..cols.offset + cols.len {
                counts[i as usize * problem.n + j as usize] += 1;
            }
        }
    }

    counts
}

fn assert_covered_once(problem: &ResolvedProblem, events: &[AnchorEvent], scope: AnchorScope) {
    let counts = coverage(problem, events, scope);
    let wrong = counts.iter().filter(|count| **count != 1).count();

    assert_eq!(wrong, 0, "{scope} anchors cover {wrong} elements a wrong number of times");
}

fn run(
    problem: &ResolvedProblem,
    config: &TilingConfig,
    seed: u64,
) -> (Kernel, AnchorRecorder, Vec<AnchorEvent>) {
    let hw = HardwareContext::new(config.num_threads, L2);
    let mut recorder = AnchorRecorder::default();
    let kernel = generate(problem, config, &hw, Some(&mut recorder)).unwrap();

    let case = MatmulTestCase::random(problem.problem.clone(), seed);
    let log = AnchorLog::new();
    let (actual, _) = case.execute(problem, &kernel, config.num_threads, &log);
    assert_equals_approx(&actual, &case.reference(), 1e-5).unwrap();

    (kernel, recorder, log.take())
}

#[test_log::test]
fn every_region_is_final_exactly_once() {
    for out in [MatrixLayout::Plain, MatrixLayout::Blocked] {
        // 9 x 7 blocks on 2 x 2 teams: both axes are imbalanced, and sub-blocks are uneven.
        let problem = resolved(144, 112, 64, out);
        let config = config(2, 2, (2, 3, 2));

        let (_, _, events) = run(&problem, &config, 1);

        for scope in [AnchorScope::Tile, AnchorScope::SubBlock, AnchorScope::Team] {
            assert_covered_once(&problem, &events, scope);
        }
        assert!(events.iter().all(|event| event.scope != AnchorScope::RowPanel));
        assert!(events.iter().all(|event| event.scope != AnchorScope::ReduceTile));
    }
}

#[test_log::test]
fn boundary_table_covers_all_combinations() {
    let problem = resolved(144, 112, 64, MatrixLayout::Plain);
    let config = config(2, 2, (2, 3, 2));

    let (kernel, recorder, events) = run(&problem, &config, 2);

    let sub_block = recorder.with_scope(AnchorScope::SubBlock).next().unwrap();
    assert_eq!(sub_block.variants.len(), 16);
    let team = recorder.with_scope(AnchorScope::Team).next().unwrap();
    assert_eq!(team.variants.len(), 4);

    for event in events.iter() {
        assert!(event.variant < kernel.anchor(event.anchor).variants.len());
    }

    // Rows: 5 blocks as 3 + 2, then 4 blocks as 2 + 2. Columns: 4 blocks as 2 + 1 + 1, then
    // 3 blocks as 1 + 1 + 1. Three shapes per axis reach a sub-block anchor.
    let selected = events
        .iter()
        .filter(|event| event.scope == AnchorScope::SubBlock)
        .map(|event| event.variant)
        .collect::<HashSet<_>>();
    assert_eq!(selected.len(), 9);
}

#[test_log::test]
fn regular_split_needs_no_selection() {
    // 8 x 4 blocks on 4 x 1 teams, with even sub-blocks.
    let problem = resolved(128, 64, 32, MatrixLayout::Plain);
    let config = config(4, 1, (2, 2, 1));

    let (kernel, recorder, events) = run(&problem, &config, 3);

    assert!(kernel.anchors.iter().all(|anchor| !anchor.is_conditional()));
    assert_eq!(recorder.anchors, kernel.anchors);
    assert!(events.iter().all(|event| event.variant == 0));

    for scope in [
        AnchorScope::Tile,
        AnchorScope::SubBlock,
        AnchorScope::Team,
        AnchorScope::RowPanel,
    ] {
        assert_covered_once(&problem, &events, scope);
    }
}

#[test_log::test]
fn split_reduction_publishes_reduced_tiles() {
    for out in [MatrixLayout::Plain, MatrixLayout::Blocked] {
        // 2 M teams and 2 K teams of 8 blocks each.
        let problem = resolved(144, 112, 256, out);
        let config = config(2, 1, (1, 1, 4));
        assert_eq!(config.k_split_num(), 2);

        let (kernel, _, events) = run(&problem, &config, 4);

        assert_eq!(kernel.anchors.iter().filter(|a| a.scope == AnchorScope::Tile).count(), 0);
        for scope in [
            AnchorScope::ReduceTile,
            AnchorScope::Team,
            AnchorScope::RowPanel,
        ] {
            assert_covered_once(&problem, &events, scope);
        }
    }
}

#[test_log::test]
fn planned_kernels_cover_the_output() {
    let shapes = [(100, 60, 64, 4), (33, 200, 100, 3), (130, 70, 500, 6), (17, 5, 9, 8)];

    for (m, n, k, threads) in shapes {
        let mut planner = MatmulPlanner::new(HardwareContext::new(threads, 64 * 1024));
        let plan = planner.plan(&MatmulProblem::new(m, n, k, MatmulElems::f32())).unwrap();
        let case = MatmulTestCase::random(plan.problem.problem.clone(), m as u64);
        let log = AnchorLog::new();

        let (actual, _) = case.execute_plan(&plan, &log);
        assert_equals_approx(&actual, &case.reference(), 1e-5).unwrap();

        let events = log.take();
        let scopes = match plan.splits_k() {
            true => vec![AnchorScope::ReduceTile, AnchorScope::Team],
            false => vec![AnchorScope::Tile, AnchorScope::SubBlock, AnchorScope::Team],
        };
        for scope in scopes {
            assert_covered_once(&plan.problem, &events, scope);
        }
        if plan.config.n_split_num == 1 {
            assert_covered_once(&plan.problem, &events, AnchorScope::RowPanel);
        }
    }
}
