use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use async_trait::async_trait;
use bon::Builder;
use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::acquisition::Acquisition;
use super::space::{Configuration, Observation, SearchSpace};
use super::surrogate::{LinearSurrogate, Surrogate};
use crate::core::{OptimizeError, Phase, ProgressCallback, ProgressEvent, emit_progress};

/// The function being maximized: score one configuration.
///
/// The teleprompter's objective installs the configuration into a student
/// clone and measures it on a validation slice, but anything that maps a
/// configuration to a score fits. Failures are recoverable — the optimizer
/// records no observation and moves on.
#[async_trait]
pub trait Objective: Send + Sync {
    async fn evaluate(&self, candidate: &Configuration) -> anyhow::Result<f32>;
}

/// Counters describing one `optimize` run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OptimizerStats {
    /// Objective calls issued (successes plus failures).
    pub evaluations: usize,
    pub failed_evaluations: usize,
    /// Search iterations run after seeding.
    pub iterations: usize,
    pub converged: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// Result of one `optimize` run.
#[derive(Debug, Clone)]
pub struct OptimizeReport {
    pub best_configuration: Configuration,
    pub best_score: f32,
    pub observations: Vec<Observation>,
    /// Iteration at which the patience counter tripped, if it did.
    pub convergence_iteration: Option<usize>,
    pub stats: OptimizerStats,
}

/// Surrogate-driven search over (instruction, demo-subset) configurations.
///
/// The loop: draw random seed configurations and evaluate them in parallel,
/// then iterate — fit the surrogate to all observations, propose a fresh
/// candidate pool, evaluate the acquisition maximizer, and stop on
/// convergence patience, pool exhaustion, the iteration budget, or the
/// overall timeout. An overall-timeout trip is a partial success: the best
/// observation so far is the product, not an error.
///
/// Given a fixed `seed` and a pure objective, runs are reproducible.
///
/// # Errors
///
/// - [`OptimizeError::NoCandidates`] when the search space fails closed
/// - [`OptimizeError::NoInitialObservations`] when every seed evaluation fails
#[derive(Builder, Clone)]
pub struct BayesianOptimizer {
    #[builder(default = 10)]
    pub num_initial_samples: usize,

    #[builder(default = 50)]
    pub max_iterations: usize,

    /// Consecutive non-improving iterations tolerated before halting.
    #[builder(default = 5)]
    pub convergence_patience: usize,

    #[builder(default = Acquisition::ExpectedImprovement)]
    pub acquisition: Acquisition,

    /// `β` for the upper-confidence-bound acquisition.
    #[builder(default = 2.0)]
    pub exploration_weight: f32,

    #[builder(default = 20)]
    pub candidate_pool_size: usize,

    /// Maximum in-flight seed evaluations.
    #[builder(default = 20)]
    pub concurrency: usize,

    /// Cap on a single objective evaluation.
    pub per_eval_timeout: Option<Duration>,

    /// Budget for the whole run; on trip the best-so-far is returned.
    pub overall_timeout: Option<Duration>,

    /// Fixed seed for reproducible search; entropy-seeded when unset.
    pub seed: Option<u64>,

    pub on_progress: Option<ProgressCallback>,

    pub correlation_id: Option<String>,
}

impl BayesianOptimizer {
    pub async fn optimize(
        &self,
        space: &SearchSpace,
        objective: &dyn Objective,
    ) -> Result<OptimizeReport, OptimizeError> {
        let started = Instant::now();
        let deadline = self.overall_timeout.map(|timeout| started + timeout);

        if !space.yields_candidates() {
            return Err(OptimizeError::NoCandidates);
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut observations: Vec<Observation> = Vec::new();
        let mut stats = OptimizerStats::default();

        self.run_seeds(space, objective, deadline, &mut rng, &mut observations, &mut stats)
            .await;
        if observations.is_empty() {
            return Err(OptimizeError::NoInitialObservations);
        }

        // Earlier observation wins score ties.
        let mut best_index = 0;
        for (index, observation) in observations.iter().enumerate() {
            if observation.score > observations[best_index].score {
                best_index = index;
            }
        }
        let mut best = observations[best_index].clone();

        let mut observed: HashSet<Configuration> = observations
            .iter()
            .map(|observation| observation.configuration.clone())
            .collect();
        let mut surrogate = LinearSurrogate::default();
        let mut patience = 0usize;
        let mut convergence_iteration = None;

        for iteration in 0..self.max_iterations {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                stats.timed_out = true;
                break;
            }

            surrogate.fit(&observations);
            let candidates = self.generate_candidates(space, &observed, &mut rng);
            if candidates.is_empty() {
                debug!(iteration, "candidate pool exhausted; halting");
                break;
            }

            let selected = self.select_candidate(&surrogate, &candidates, best.score);
            stats.evaluations += 1;
            match self.evaluate_once(objective, &selected, deadline).await {
                Ok(score) => {
                    let observation =
                        Observation::after(selected.clone(), score, last_timestamp(&observations));
                    observed.insert(selected);
                    observations.push(observation.clone());
                    if score > best.score {
                        best = observation;
                        patience = 0;
                    } else {
                        patience += 1;
                    }
                }
                Err(err) => {
                    debug!(iteration, error = %err, "evaluation failed; no observation");
                    stats.failed_evaluations += 1;
                    patience += 1;
                }
            }
            stats.iterations = iteration + 1;

            emit_progress(
                &self.on_progress,
                ProgressEvent {
                    phase: Phase::Optimize,
                    completed: iteration + 1,
                    total: self.max_iterations,
                    score: Some(best.score),
                    correlation_id: correlation_id.clone(),
                },
            );

            if patience >= self.convergence_patience {
                convergence_iteration = Some(iteration + 1);
                stats.converged = true;
                break;
            }
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            best_score = best.score,
            evaluations = stats.evaluations,
            iterations = stats.iterations,
            converged = stats.converged,
            timed_out = stats.timed_out,
            "optimization finished"
        );

        Ok(OptimizeReport {
            best_configuration: best.configuration.clone(),
            best_score: best.score,
            observations,
            convergence_iteration,
            stats,
        })
    }

    /// Draws and evaluates the initial random configurations.
    ///
    /// Evaluations run concurrently with bounded parallelism and are joined
    /// as one batch, so observations land in seed order — completion-time
    /// ordering with seed-index tie-breaks collapses to exactly that.
    async fn run_seeds(
        &self,
        space: &SearchSpace,
        objective: &dyn Objective,
        deadline: Option<Instant>,
        rng: &mut StdRng,
        observations: &mut Vec<Observation>,
        stats: &mut OptimizerStats,
    ) {
        let seeds: Vec<Configuration> = (0..self.num_initial_samples)
            .filter_map(|_| space.random_configuration(rng))
            .collect();

        let results = futures::stream::iter(
            seeds
                .into_iter()
                .map(|configuration| Self::run_seed(self, objective, deadline, configuration)),
        )
        .buffered(self.concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        for (configuration, result) in results {
            stats.evaluations += 1;
            match result {
                Ok(score) => {
                    let observation =
                        Observation::after(configuration, score, last_timestamp(observations));
                    observations.push(observation);
                }
                Err(err) => {
                    debug!(error = %err, "seed evaluation failed");
                    stats.failed_evaluations += 1;
                }
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            stats.timed_out = true;
        }
    }

    async fn run_seed(
        &self,
        objective: &dyn Objective,
        deadline: Option<Instant>,
        configuration: Configuration,
    ) -> (Configuration, anyhow::Result<f32>) {
        let result = self.evaluate_once(objective, &configuration, deadline).await;
        (configuration, result)
    }

    async fn evaluate_once(
        &self,
        objective: &dyn Objective,
        candidate: &Configuration,
        deadline: Option<Instant>,
    ) -> anyhow::Result<f32> {
        let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let budget = match (self.per_eval_timeout, remaining) {
            (Some(per_eval), Some(remaining)) => Some(per_eval.min(remaining)),
            (Some(per_eval), None) => Some(per_eval),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        };

        match budget {
            Some(budget) => tokio::time::timeout(budget, objective.evaluate(candidate))
                .await
                .map_err(|_| anyhow!("objective evaluation timed out after {budget:?}"))?,
            None => objective.evaluate(candidate).await,
        }
    }

    /// Fresh, value-deduplicated candidate pool.
    ///
    /// Small spaces are enumerated exhaustively so exhaustion is detected
    /// exactly; large spaces are rejection-sampled with an attempt budget.
    fn generate_candidates(
        &self,
        space: &SearchSpace,
        observed: &HashSet<Configuration>,
        rng: &mut StdRng,
    ) -> Vec<Configuration> {
        let pool_size = self.candidate_pool_size.max(1);
        let enumeration_cutoff = (pool_size * 8).max(64);

        if space.total_configurations(enumeration_cutoff) < enumeration_cutoff {
            return space
                .enumerate_all()
                .into_iter()
                .filter(|candidate| !observed.contains(candidate))
                .take(pool_size)
                .collect();
        }

        let mut fresh: Vec<Configuration> = Vec::with_capacity(pool_size);
        let mut attempts = 0;
        while fresh.len() < pool_size && attempts < pool_size * 20 {
            attempts += 1;
            let Some(candidate) = space.random_configuration(rng) else {
                break;
            };
            if observed.contains(&candidate) || fresh.contains(&candidate) {
                continue;
            }
            fresh.push(candidate);
        }
        fresh
    }

    /// Acquisition maximizer; the first-generated candidate wins ties.
    fn select_candidate(
        &self,
        surrogate: &LinearSurrogate,
        candidates: &[Configuration],
        best_score: f32,
    ) -> Configuration {
        let mut selected = 0;
        let mut selected_score = f32::MIN;
        for (index, candidate) in candidates.iter().enumerate() {
            let (mean, variance) = surrogate.predict(candidate);
            let score =
                self.acquisition
                    .score(mean, variance, best_score, self.exploration_weight);
            if score > selected_score {
                selected = index;
                selected_score = score;
            }
        }
        candidates[selected].clone()
    }
}

fn last_timestamp(observations: &[Observation]) -> Option<chrono::DateTime<chrono::Utc>> {
    observations.last().map(|observation| observation.timestamp)
}
