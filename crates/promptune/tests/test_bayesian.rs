use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use promptune::{
    Acquisition, BayesianOptimizer, Configuration, Demonstration, Instruction, Objective,
    OptimizeError, SearchSpace, example_from_pairs,
};

fn demo(tag: &str) -> Demonstration {
    Demonstration::new(
        example_from_pairs(&[("question", tag), ("answer", tag)], &["question"]),
        1.0,
    )
}

fn space(instructions: usize, demos: usize, max_demos: usize) -> SearchSpace {
    SearchSpace::new(
        (0..instructions)
            .map(|i| Instruction::new(format!("instruction {i}")))
            .collect(),
        (0..demos).map(|i| demo(&format!("d{i}"))).collect(),
        max_demos,
    )
}

/// Pure objective: more demos score higher, deterministically.
struct DemoCountObjective;

#[async_trait]
impl Objective for DemoCountObjective {
    async fn evaluate(&self, candidate: &Configuration) -> anyhow::Result<f32> {
        Ok(0.1 + candidate.demo_ids.len() as f32 * 0.2)
    }
}

struct ConstObjective(f32);

#[async_trait]
impl Objective for ConstObjective {
    async fn evaluate(&self, _candidate: &Configuration) -> anyhow::Result<f32> {
        Ok(self.0)
    }
}

struct CountingObjective {
    calls: AtomicUsize,
}

impl CountingObjective {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Objective for CountingObjective {
    async fn evaluate(&self, candidate: &Configuration) -> anyhow::Result<f32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(candidate.demo_ids.len() as f32 * 0.1)
    }
}

struct AlwaysFails;

#[async_trait]
impl Objective for AlwaysFails {
    async fn evaluate(&self, _candidate: &Configuration) -> anyhow::Result<f32> {
        Err(anyhow!("evaluation failure"))
    }
}

/// First call returns instantly; every later call hangs far past any test
/// deadline.
struct SlowAfterFirst {
    calls: AtomicUsize,
}

#[async_trait]
impl Objective for SlowAfterFirst {
    async fn evaluate(&self, _candidate: &Configuration) -> anyhow::Result<f32> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(0.7)
        } else {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(0.9)
        }
    }
}

fn optimizer() -> BayesianOptimizer {
    BayesianOptimizer::builder().seed(17).build()
}

#[tokio::test]
async fn best_score_dominates_every_observation() {
    let space = space(3, 4, 2);
    let report = optimizer()
        .optimize(&space, &DemoCountObjective)
        .await
        .unwrap();

    for observation in &report.observations {
        assert!(report.best_score >= observation.score);
    }
    assert_eq!(
        report.best_score,
        report
            .observations
            .iter()
            .map(|o| o.score)
            .fold(f32::MIN, f32::max)
    );
}

#[tokio::test]
async fn identical_seeds_reproduce_the_run() {
    let space = space(3, 4, 2);

    let first = optimizer()
        .optimize(&space, &DemoCountObjective)
        .await
        .unwrap();
    let second = optimizer()
        .optimize(&space, &DemoCountObjective)
        .await
        .unwrap();

    let sequence = |report: &promptune::OptimizeReport| {
        report
            .observations
            .iter()
            .map(|o| {
                (
                    o.configuration.instruction_id.clone(),
                    o.configuration.demo_ids.clone(),
                    o.score,
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(sequence(&first), sequence(&second));
    assert_eq!(
        first.best_configuration.instruction_id,
        second.best_configuration.instruction_id
    );
    assert_eq!(first.best_configuration.demo_ids, second.best_configuration.demo_ids);
}

#[tokio::test]
async fn call_budget_is_respected() {
    let space = space(4, 5, 3);
    let objective = CountingObjective::new();
    let optimizer = BayesianOptimizer::builder()
        .seed(3)
        .num_initial_samples(5)
        .max_iterations(7)
        .convergence_patience(100)
        .build();

    let report = optimizer.optimize(&space, &objective).await.unwrap();

    let calls = objective.calls.load(Ordering::SeqCst);
    assert!(calls <= 5 + 7, "issued {calls} objective calls");
    assert_eq!(report.stats.evaluations, calls);
}

#[tokio::test]
async fn observations_never_violate_space_invariants() {
    let space = space(3, 5, 2);
    let demo_ids: HashSet<String> = space.demos.iter().map(|d| d.demo_id.clone()).collect();
    let instruction_ids: HashSet<String> = space
        .instructions
        .iter()
        .map(|i| i.instruction_id.clone())
        .collect();

    let report = optimizer()
        .optimize(&space, &DemoCountObjective)
        .await
        .unwrap();

    for observation in &report.observations {
        let config = &observation.configuration;
        assert!(config.demo_ids.len() <= 2);
        assert!(instruction_ids.contains(&config.instruction_id));
        let unique: HashSet<&String> = config.demo_ids.iter().collect();
        assert_eq!(unique.len(), config.demo_ids.len());
        for id in &config.demo_ids {
            assert!(demo_ids.contains(id));
        }
    }
}

#[tokio::test]
async fn timestamps_increase_strictly() {
    let space = space(2, 3, 2);
    let report = optimizer()
        .optimize(&space, &DemoCountObjective)
        .await
        .unwrap();

    for pair in report.observations.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
}

#[tokio::test]
async fn zero_demo_cap_still_completes() {
    let space = space(3, 0, 0);
    let report = optimizer()
        .optimize(&space, &ConstObjective(0.4))
        .await
        .unwrap();

    assert!(report.observations.iter().all(|o| o.configuration.demo_ids.is_empty()));
    assert!(report.best_configuration.demo_ids.is_empty());
}

#[tokio::test]
async fn exhausted_space_halts_early() {
    // One instruction and one demo with a cap of one: two configurations.
    let space = space(1, 1, 1);
    let objective = CountingObjective::new();
    let optimizer = BayesianOptimizer::builder()
        .seed(11)
        .num_initial_samples(1)
        .max_iterations(10)
        .convergence_patience(100)
        .build();

    optimizer.optimize(&space, &objective).await.unwrap();

    assert!(objective.calls.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn constant_objective_halts_at_patience() {
    let space = space(2, 4, 2);
    let optimizer = BayesianOptimizer::builder()
        .seed(5)
        .num_initial_samples(1)
        .max_iterations(50)
        .convergence_patience(3)
        .build();

    let report = optimizer.optimize(&space, &ConstObjective(0.5)).await.unwrap();

    assert!(report.stats.converged);
    assert_eq!(report.stats.iterations, 3);
    assert_eq!(report.convergence_iteration, Some(3));
    assert_eq!(report.best_score, 0.5);
}

#[tokio::test]
async fn failed_evaluations_count_toward_patience() {
    let space = space(2, 4, 2);
    let seeded = BayesianOptimizer::builder()
        .seed(5)
        .num_initial_samples(1)
        .max_iterations(50)
        .convergence_patience(2)
        .build();

    // The single seed must succeed, so alternate: seeds succeed, iterations fail.
    struct SeedOnlyObjective {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Objective for SeedOnlyObjective {
        async fn evaluate(&self, _candidate: &Configuration) -> anyhow::Result<f32> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(0.5)
            } else {
                Err(anyhow!("downstream failure"))
            }
        }
    }

    let objective = SeedOnlyObjective {
        calls: AtomicUsize::new(0),
    };
    let report = seeded.optimize(&space, &objective).await.unwrap();

    assert!(report.stats.converged);
    assert_eq!(report.stats.iterations, 2);
    assert_eq!(report.stats.failed_evaluations, 2);
    assert_eq!(report.observations.len(), 1);
}

#[tokio::test]
async fn overall_timeout_returns_partial_best() {
    let space = space(3, 4, 2);
    let objective = SlowAfterFirst {
        calls: AtomicUsize::new(0),
    };
    let optimizer = BayesianOptimizer::builder()
        .seed(9)
        .num_initial_samples(3)
        .max_iterations(20)
        .overall_timeout(Duration::from_millis(100))
        .build();

    let report = optimizer.optimize(&space, &objective).await.unwrap();

    assert!(report.stats.timed_out);
    assert_eq!(report.observations.len(), 1);
    assert_eq!(report.best_score, 0.7);
}

#[tokio::test]
async fn empty_instruction_pool_fails_closed() {
    let space = space(0, 3, 2);
    let err = optimizer()
        .optimize(&space, &ConstObjective(0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::NoCandidates));
}

#[tokio::test]
async fn empty_demo_pool_fails_closed_when_load_bearing() {
    let space = space(2, 0, 2);
    let err = optimizer()
        .optimize(&space, &ConstObjective(0.5))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::NoCandidates));
}

#[tokio::test]
async fn all_seeds_failing_is_fatal() {
    let space = space(2, 3, 2);
    let err = optimizer().optimize(&space, &AlwaysFails).await.unwrap_err();
    assert!(matches!(err, OptimizeError::NoInitialObservations));
}

#[tokio::test]
async fn acquisition_variants_all_drive_the_loop() {
    for acquisition in [
        Acquisition::ExpectedImprovement,
        Acquisition::UpperConfidenceBound,
        Acquisition::ProbabilityOfImprovement,
    ] {
        let space = space(3, 4, 2);
        let optimizer = BayesianOptimizer::builder()
            .seed(23)
            .acquisition(acquisition)
            .max_iterations(5)
            .build();
        let report = optimizer
            .optimize(&space, &DemoCountObjective)
            .await
            .unwrap();
        assert!(report.best_score > 0.0);
    }
}
