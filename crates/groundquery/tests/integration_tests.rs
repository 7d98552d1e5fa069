//! End-to-end inference on small hand-built query trees.
//!
//! Covers:
//! - the worked scenarios for determiners and conjunctions
//! - dual decomposition reaching agreement and matching the ILP
//! - configuration-driven inference
//! - many queries sharing one engine pool

use approx::assert_abs_diff_eq;
use groundquery::{
    and_truth_table, CombinatorNode, DualDecompositionStatus, EnginePool, InferenceConfig,
    InferenceStrategy, QueryError,
};
use groundquery_tensor::{DenseTensor, DiscreteVariable, VariableSet, WeightedRelationTable};

// ============================================================================
// Helper Functions
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A unary predicate over entity variable 0, with `(false, true)` weights per entity.
fn unary(name: &str, value_var: usize, weights: &[(f64, f64)]) -> CombinatorNode {
    let names = ["x", "y", "z"];
    let entities = DiscreteVariable::entity("entity", &names[..weights.len()]);
    let table = WeightedRelationTable::from_boolean_weights(
        VariableSet::singleton(0, entities),
        value_var,
        weights,
    )
    .unwrap();
    CombinatorNode::predicate(name, table, false).unwrap()
}

/// A binary predicate over entity variables 0 and 1, weights in row-major order.
fn binary(name: &str, value_var: usize, weights: &[(f64, f64)]) -> CombinatorNode {
    let entities = DiscreteVariable::entity("entity", &["x", "y"]);
    let index = VariableSet::empty()
        .with(0, entities.clone())
        .with(1, entities);
    let table = WeightedRelationTable::from_boolean_weights(index, value_var, weights).unwrap();
    CombinatorNode::predicate(name, table, false).unwrap()
}

/// Entities whose output is true, in index order.
fn true_entities(indicator: &DenseTensor) -> Vec<usize> {
    let value_dim = *indicator.dims().last().unwrap();
    indicator
        .slice(&[value_dim], &[1])
        .unwrap()
        .nonzero_keys()
        .into_iter()
        .map(|key| key[0])
        .collect()
}

fn red_and_round(red: &[(f64, f64)], round: &[(f64, f64)]) -> CombinatorNode {
    let tt = and_truth_table().unwrap();
    CombinatorNode::create_conjunction(&tt, unary("red", 2, red), unary("round", 3, round), 0)
        .unwrap()
}

// ============================================================================
// Worked Scenarios
// ============================================================================

#[test]
fn determiner_selects_highest_weight_entity() {
    init_tracing();
    let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
    let a_red = CombinatorNode::determiner(red, false).unwrap();
    let pool = EnginePool::new(1);

    let result = a_red.ilp_inference(&pool, false, true).unwrap();
    assert_eq!(true_entities(result.value()), vec![0]);
    assert_eq!(true_entities(result.child_values()[0]), vec![0]);
    assert_eq!(a_red.assignment_string(&result).unwrap(), "red: {[x] }");
    assert_eq!(pool.available(), 1);
}

#[test]
fn conjunction_of_true_and_false_is_false() {
    init_tracing();
    let and = red_and_round(&[(0.0, 1.0)], &[(1.0, 0.0)]);
    let pool = EnginePool::new(1);

    let result = and.ilp_inference(&pool, false, true).unwrap();
    assert!(true_entities(result.value()).is_empty());
    assert_eq!(true_entities(result.child_values()[0]), vec![0]);
    assert!(true_entities(result.child_values()[1]).is_empty());

    // Brute force over the 2x2 inputs: the AND output is forced, so the best
    // total score is the sum of the children's best weights.
    assert_abs_diff_eq!(and.score_of(&result).unwrap(), 2.0, epsilon = 1e-9);
}

#[test]
fn lp_relaxation_agrees_on_integral_problem() {
    // The relaxation has a unique, integral optimum here.
    let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
    let a_red = CombinatorNode::determiner(red, false).unwrap();
    let pool = EnginePool::new(1);
    let exact = a_red.ilp_inference(&pool, false, true).unwrap();
    let relaxed = a_red.ilp_inference(&pool, true, true).unwrap();
    assert_eq!(exact, relaxed);
}

#[test]
fn existential_finds_a_witness() {
    // left_of(x, y) is the only likely grounding: exists y. left_of(_, y)
    // holds for x only.
    let left_of = binary(
        "left_of",
        2,
        &[(0.0, -1.0), (0.0, 3.0), (0.0, -2.0), (0.0, -1.0)],
    );
    let exists = CombinatorNode::eliminate_variables(left_of, &[1]).unwrap();
    let pool = EnginePool::new(1);

    let result = exists.ilp_inference(&pool, false, true).unwrap();
    assert_eq!(true_entities(result.value()), vec![0]);
    assert_eq!(result.value(), exists.evaluate_query_map().unwrap().value());
}

#[test]
fn the_requires_a_unique_child() {
    // Both entities are red, but `the` allows only one.
    let red = unary("red", 2, &[(0.0, 2.0), (0.0, 1.0)]);
    let the_red = CombinatorNode::determiner(red, true).unwrap();
    let pool = EnginePool::new(1);

    let result = the_red.ilp_inference(&pool, false, true).unwrap();
    assert_eq!(true_entities(result.value()), vec![0]);
    assert_eq!(true_entities(result.child_values()[0]), vec![0]);

    // Without weak supervision nothing forces a choice and both stay red.
    let unconstrained = the_red.ilp_inference(&pool, false, false).unwrap();
    assert_eq!(true_entities(unconstrained.child_values()[0]), vec![0, 1]);
}

#[test]
fn node_limit_is_reported_as_infeasible() {
    let red = unary("red", 2, &[(0.0, 2.0), (0.0, 1.0), (0.0, 0.5)]);
    let the_red = CombinatorNode::determiner(red, true).unwrap();
    let mut config = InferenceConfig::default();
    config.ilp.node_limit = Some(0);
    let pool = config.build_pool();
    assert!(matches!(
        the_red.infer(&config, &pool),
        Err(QueryError::InfeasibleQuery(_))
    ));
}

// ============================================================================
// Dual Decomposition
// ============================================================================

#[test]
fn dual_decomposition_true_and_false() {
    init_tracing();
    let mut and = red_and_round(&[(0.0, 2.0)], &[(1.0, 0.0)]);
    let report = and.dual_decomposition(100).unwrap();
    assert_eq!(report.status, DualDecompositionStatus::Converged);
    assert_eq!(report.disagreements, 0);
    assert!(report.iterations <= 100);
    let decoded = and.locally_decode_variables().unwrap();
    assert!(true_entities(decoded.value()).is_empty());
}

#[test]
fn dual_decomposition_matches_ilp_on_two_entities() {
    let and = red_and_round(&[(0.0, 2.0), (1.0, 0.0)], &[(0.0, 3.0), (0.0, 1.5)]);
    let reparameterized = and.reparameterize_dual_decomposition(100).unwrap();
    let decoded = reparameterized.locally_decode_variables().unwrap();
    assert_eq!(true_entities(decoded.value()), vec![0]);

    let pool = EnginePool::new(1);
    let exact = and.ilp_inference(&pool, false, true).unwrap();
    assert_eq!(decoded.value(), exact.value());
    // scores are read off the original weights
    assert_abs_diff_eq!(
        and.score_of(&decoded).unwrap(),
        and.score_of(&exact).unwrap(),
        epsilon = 1e-9
    );
}

#[test]
fn dual_decomposition_runs_on_existentials() {
    let left_of = binary(
        "left_of",
        2,
        &[(0.0, -1.0), (0.0, 3.0), (0.0, -2.0), (0.0, -1.0)],
    );
    let exists = CombinatorNode::eliminate_variables(left_of, &[1]).unwrap();
    let copy = exists.reparameterize_dual_decomposition(50).unwrap();
    let decoded = copy.locally_decode_variables().unwrap();
    assert_eq!(decoded.size(), 2);
    assert!(exists.score_of(&decoded).unwrap().is_finite());
}

#[test]
fn dual_decomposition_rejects_determiners() {
    let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
    let the_red = CombinatorNode::determiner(red, true).unwrap();
    let mut config = InferenceConfig::default();
    config.strategy = InferenceStrategy::DualDecomposition;
    let pool = config.build_pool();
    assert!(matches!(
        the_red.infer(&config, &pool),
        Err(QueryError::UnsupportedOperation(_))
    ));
}

#[test]
fn configured_strategies_agree() {
    let and = red_and_round(&[(0.0, 2.0), (1.0, 0.0)], &[(0.0, 3.0), (0.0, 1.5)]);
    let ilp = InferenceConfig::default();
    let pool = ilp.build_pool();
    let dd = InferenceConfig::from_toml_str(
        r#"
        strategy = "dual_decomposition"

        [dual_decomposition]
        max_iterations = 100
        "#,
    )
    .unwrap();

    let by_ilp = and.infer(&ilp, &pool).unwrap();
    let by_dd = and.infer(&dd, &pool).unwrap();
    assert_eq!(by_ilp.value(), by_dd.value());
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_queries_share_pool() {
    init_tracing();
    let pool = EnginePool::new(4);
    let tree = CombinatorNode::determiner(
        red_and_round(&[(0.0, 2.0), (1.0, 0.0)], &[(0.0, 3.0), (0.0, 1.5)]),
        false,
    )
    .unwrap();
    let expected = tree.ilp_inference(&pool, false, true).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let tree = tree.clone();
            let pool = &pool;
            let expected = &expected;
            scope.spawn(move || {
                for _ in 0..5 {
                    let result = tree.ilp_inference(pool, false, true).unwrap();
                    assert_eq!(&result, expected);
                }
            });
        }
    });

    assert_eq!(pool.available(), 4);
    assert_eq!(pool.stats().acquisitions, 21);
    assert_eq!(pool.stats().exhaustions, 0);
}

#[test]
fn exhausted_pool_fails_the_query() {
    let red = unary("red", 2, &[(0.0, 2.0), (1.0, 0.0)]);
    let pool = EnginePool::new(1);
    let _held = pool.acquire().unwrap();
    assert_eq!(
        red.ilp_inference(&pool, false, true),
        Err(QueryError::SolverResourceExhaustion { pool_size: 1 })
    );
}

#[test]
fn reparameterized_copy_is_independent() {
    let and = red_and_round(&[(0.0, 2.0), (1.0, 0.0)], &[(0.0, 3.0), (0.0, 1.5)]);
    let original = and.clone();

    std::thread::scope(|scope| {
        let worker = scope.spawn(|| and.reparameterize_dual_decomposition(100).unwrap());
        let pool = EnginePool::new(1);
        let exact = and.ilp_inference(&pool, false, true).unwrap();
        assert_eq!(true_entities(exact.value()), vec![0]);
        let copy = worker.join().unwrap();
        assert_ne!(copy, original);
    });

    assert_eq!(and, original);
}
