use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use bon::Builder;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval_at, sleep_until};
use tracing::{debug, info, warn};

use super::teleprompter::Teleprompter;
use crate::core::{CallOptions, ProgramRunner, forward_with_timeout};
use crate::data::Example;
use crate::evaluate::{Metric, SafeMetric, average_score};

/// Lifecycle of the supervised program.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    Initialized,
    Running,
    Optimizing,
    Error,
}

/// One quality-check result kept in the bounded history ring.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QualityRecord {
    pub timestamp: DateTime<Utc>,
    pub score: f32,
    pub optimization_count: usize,
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub status: ControllerStatus,
    pub optimization_count: usize,
    pub last_optimization_at: Option<DateTime<Utc>>,
    pub last_quality_check_at: Option<DateTime<Utc>>,
    pub quality_history: Vec<QualityRecord>,
    pub num_instruction_candidates: usize,
    pub max_iterations: usize,
}

/// Tunables of the continuous-optimization schedule.
#[derive(Builder, Debug, Clone)]
pub struct ControllerConfig {
    #[builder(default = Duration::from_secs(24 * 60 * 60))]
    pub optimization_interval: Duration,

    #[builder(default = Duration::from_secs(6 * 60 * 60))]
    pub quality_check_interval: Duration,

    /// Quality below this triggers immediate re-optimization.
    #[builder(default = 0.7)]
    pub quality_threshold: f32,

    /// Minimum relative improvement required to adopt a new program.
    #[builder(default = 0.02)]
    pub improvement_threshold: f32,

    /// Re-optimize when this much time passed since the last optimization.
    #[builder(default = Duration::from_secs(48 * 60 * 60))]
    pub stale_after: Duration,

    #[builder(default = Duration::from_secs(60))]
    pub initial_backoff: Duration,

    #[builder(default = Duration::from_secs(30 * 60))]
    pub max_backoff: Duration,

    #[builder(default = 50)]
    pub history_capacity: usize,

    /// Validation examples sampled per quality check.
    #[builder(default = 20)]
    pub quality_sample_size: usize,

    /// Fixed seed for reproducible validation sampling.
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig::builder().build()
    }
}

/// Partial config merged into a running controller via `update_config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub optimization_interval: Option<Duration>,
    pub quality_check_interval: Option<Duration>,
    pub quality_threshold: Option<f32>,
    pub improvement_threshold: Option<f32>,
}

enum Command {
    TriggerOptimization,
    UpdateConfig(ConfigUpdate),
    GetStatus(oneshot::Sender<StatusSnapshot>),
    Stop,
}

/// Opaque address of a running controller. Callers never touch controller
/// state directly; every interaction is a message through this handle.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
}

impl ControllerHandle {
    /// Forces an immediate optimization tick.
    pub async fn trigger_optimization(&self) -> Result<()> {
        self.send(Command::TriggerOptimization).await
    }

    pub async fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        self.send(Command::UpdateConfig(update)).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::GetStatus(reply)).await?;
        response
            .await
            .map_err(|_| anyhow!("controller stopped before replying"))
    }

    /// Graceful shutdown; in-flight work finishes first.
    pub async fn stop(&self) -> Result<()> {
        self.send(Command::Stop).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("controller is not running"))
    }
}

/// Long-lived supervisor owning one program and its optimization schedule.
///
/// Runs as a single actor task: periodic quality checks sample the validation
/// slice and trigger re-optimization on degradation, scheduled optimizations
/// re-run the teleprompter with adaptively scaled intensity, and fatal compile
/// errors back off exponentially (capped) instead of crashing the task.
pub struct ContinuousController {
    teleprompter: Teleprompter,
    config: ControllerConfig,
    current_program: Arc<dyn ProgramRunner>,
    /// Kept for a future revert command.
    #[allow(dead_code)]
    original_program: Arc<dyn ProgramRunner>,
    teacher: Arc<dyn ProgramRunner>,
    trainset: Vec<Example>,
    validation: Vec<Example>,
    metric: Arc<dyn Metric>,
    safe_metric: Arc<SafeMetric>,
    rng: StdRng,

    status: ControllerStatus,
    optimization_count: usize,
    last_optimization_at: Option<DateTime<Utc>>,
    last_quality_check_at: Option<DateTime<Utc>>,
    quality_history: VecDeque<QualityRecord>,

    num_instruction_candidates: usize,
    max_iterations: usize,
    retry_at: Option<Instant>,
    backoff: Duration,
}

impl ContinuousController {
    /// Starts the supervisor and returns its handle.
    pub fn spawn(
        student: Arc<dyn ProgramRunner>,
        teacher: Arc<dyn ProgramRunner>,
        trainset: Vec<Example>,
        metric: Arc<dyn Metric>,
        teleprompter: Teleprompter,
        config: ControllerConfig,
    ) -> ControllerHandle {
        let (commands, inbox) = mpsc::channel(32);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Quality checks run against the same deterministic validation slice
        // the teleprompter would hold out.
        let validation = if trainset.len() < 2 {
            trainset.clone()
        } else {
            let split = (trainset.len() * 4 / 5).clamp(1, trainset.len() - 1);
            trainset[split..].to_vec()
        };

        let controller = ContinuousController {
            num_instruction_candidates: teleprompter.num_instruction_candidates,
            max_iterations: teleprompter.max_iterations,
            backoff: config.initial_backoff,
            safe_metric: Arc::new(SafeMetric::new(Arc::clone(&metric))),
            current_program: Arc::clone(&student),
            original_program: student,
            teacher,
            trainset,
            validation,
            metric,
            rng,
            status: ControllerStatus::Initialized,
            optimization_count: 0,
            last_optimization_at: None,
            last_quality_check_at: None,
            quality_history: VecDeque::new(),
            retry_at: None,
            teleprompter,
            config,
        };

        let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(controller.run(inbox));
        tokio::spawn(task);
        ControllerHandle { commands }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        self.status = ControllerStatus::Running;
        let mut quality_tick = schedule(self.config.quality_check_interval);
        let mut optimization_tick = schedule(self.config.optimization_interval);

        loop {
            let retry_at = self.retry_at.unwrap_or_else(far_future);
            tokio::select! {
                command = inbox.recv() => match command {
                    None | Some(Command::Stop) => break,
                    Some(Command::TriggerOptimization) => self.run_optimization().await,
                    Some(Command::UpdateConfig(update)) => {
                        self.apply_update(update, &mut quality_tick, &mut optimization_tick);
                    }
                    Some(Command::GetStatus(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                },
                _ = quality_tick.tick() => self.quality_check().await,
                _ = optimization_tick.tick() => self.run_optimization().await,
                _ = sleep_until(retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.run_optimization().await;
                }
            }
        }
        info!("controller stopped");
    }

    fn apply_update(
        &mut self,
        update: ConfigUpdate,
        quality_tick: &mut tokio::time::Interval,
        optimization_tick: &mut tokio::time::Interval,
    ) {
        if let Some(value) = update.quality_threshold {
            self.config.quality_threshold = value;
        }
        if let Some(value) = update.improvement_threshold {
            self.config.improvement_threshold = value;
        }
        if let Some(value) = update.quality_check_interval {
            self.config.quality_check_interval = value;
            *quality_tick = schedule(value);
        }
        if let Some(value) = update.optimization_interval {
            self.config.optimization_interval = value;
            *optimization_tick = schedule(value);
        }
        debug!("controller config updated");
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.status,
            optimization_count: self.optimization_count,
            last_optimization_at: self.last_optimization_at,
            last_quality_check_at: self.last_quality_check_at,
            quality_history: self.quality_history.iter().cloned().collect(),
            num_instruction_candidates: self.num_instruction_candidates,
            max_iterations: self.max_iterations,
        }
    }

    async fn quality_check(&mut self) {
        let sample = self.sample_validation();
        if sample.is_empty() {
            return;
        }

        let score = evaluate_program(
            &self.current_program,
            &sample,
            &self.safe_metric,
            self.teleprompter.concurrency,
            self.teleprompter.per_call_timeout,
        )
        .await;

        self.last_quality_check_at = Some(Utc::now());
        self.quality_history.push_back(QualityRecord {
            timestamp: Utc::now(),
            score,
            optimization_count: self.optimization_count,
        });
        while self.quality_history.len() > self.config.history_capacity {
            self.quality_history.pop_front();
        }
        debug!(score, "quality check");

        if let Some(reason) = self.reoptimization_reason(score) {
            warn!(score, reason, "quality degraded; re-optimizing");
            self.run_optimization().await;
        }
    }

    fn reoptimization_reason(&self, score: f32) -> Option<&'static str> {
        if score < self.config.quality_threshold {
            return Some("score below threshold");
        }

        let recent: Vec<f32> = self
            .quality_history
            .iter()
            .rev()
            .take(3)
            .map(|record| record.score)
            .collect();
        if recent.len() == 3 && recent[0] < recent[1] && recent[1] < recent[2] {
            return Some("three declining scores");
        }

        if let Some(last) = self.last_optimization_at {
            let stale = Utc::now() - last;
            if stale.to_std().unwrap_or_default() > self.config.stale_after {
                return Some("stale optimization");
            }
        }
        None
    }

    async fn run_optimization(&mut self) {
        self.status = ControllerStatus::Optimizing;
        self.adapt_intensity();

        let mut teleprompter = self.teleprompter.clone();
        teleprompter.num_instruction_candidates = self.num_instruction_candidates;
        teleprompter.max_iterations = self.max_iterations;

        let result = teleprompter
            .compile(
                Arc::clone(&self.current_program),
                Arc::clone(&self.teacher),
                &self.trainset,
                Arc::clone(&self.metric),
            )
            .await;

        match result {
            Ok(optimized) => {
                self.optimization_count += 1;
                self.last_optimization_at = Some(Utc::now());
                self.backoff = self.config.initial_backoff;
                self.retry_at = None;
                self.adopt_if_improved(optimized).await;
                self.status = ControllerStatus::Running;
            }
            Err(err) => {
                warn!(error = %err, backoff = ?self.backoff, "optimization failed; backing off");
                self.status = ControllerStatus::Error;
                self.retry_at = Some(Instant::now() + self.backoff);
                self.backoff = (self.backoff * 2).min(self.config.max_backoff);
            }
        }
    }

    /// Scales search intensity from recent quality history.
    fn adapt_intensity(&mut self) {
        let recent: Vec<f32> = self
            .quality_history
            .iter()
            .rev()
            .take(3)
            .map(|record| record.score)
            .collect();
        if !recent.is_empty() {
            let mean = recent.iter().sum::<f32>() / recent.len() as f32;
            if mean < 0.5 {
                self.num_instruction_candidates =
                    scale(self.teleprompter.num_instruction_candidates, 1.5);
            } else if mean > 0.8 {
                self.num_instruction_candidates =
                    scale(self.teleprompter.num_instruction_candidates, 0.8);
            } else {
                self.num_instruction_candidates = self.teleprompter.num_instruction_candidates;
            }
        }

        let window: Vec<f32> = self
            .quality_history
            .iter()
            .rev()
            .take(5)
            .map(|record| record.score)
            .collect();
        let low = window
            .iter()
            .filter(|score| **score < self.config.quality_threshold)
            .count();
        self.max_iterations = if low * 2 > window.len() && !window.is_empty() {
            scale(self.teleprompter.max_iterations, 1.5)
        } else {
            self.teleprompter.max_iterations
        };
    }

    /// Replaces the current program only on a meaningful (≥ threshold
    /// relative) improvement over its measured quality.
    async fn adopt_if_improved(&mut self, optimized: super::teleprompter::OptimizedProgram) {
        let sample = self.sample_validation();
        let current_score = match self.quality_history.back() {
            Some(record) => record.score,
            None => {
                evaluate_program(
                    &self.current_program,
                    &sample,
                    &self.safe_metric,
                    self.teleprompter.concurrency,
                    self.teleprompter.per_call_timeout,
                )
                .await
            }
        };

        let new_score = optimized.metadata.best_score;
        let improvement = (new_score - current_score) / current_score.max(1e-6);
        if improvement >= self.config.improvement_threshold {
            info!(new_score, current_score, "adopting optimized program");
            self.current_program = optimized.program();
        } else {
            warn!(
                new_score,
                current_score, "insufficient improvement; keeping prior program"
            );
        }
    }

    fn sample_validation(&mut self) -> Vec<Example> {
        let amount = self.config.quality_sample_size.min(self.validation.len());
        let mut picked =
            rand::seq::index::sample(&mut self.rng, self.validation.len(), amount).into_vec();
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|index| self.validation[index].clone())
            .collect()
    }
}

async fn evaluate_program(
    program: &Arc<dyn ProgramRunner>,
    examples: &[Example],
    metric: &Arc<SafeMetric>,
    concurrency: usize,
    per_call_timeout: Duration,
) -> f32 {
    let scores = futures::stream::iter(examples.iter().cloned().map(|example| {
        let program = Arc::clone(program);
        let metric = Arc::clone(metric);
        let options = CallOptions::new(per_call_timeout, uuid::Uuid::new_v4().to_string());
        async move {
            match forward_with_timeout(program.as_ref(), example.inputs(), &options).await {
                Ok(outputs) => metric.score(&example, &outputs).await,
                Err(err) => {
                    debug!(error = %err, "quality-check call failed; scoring 0.0");
                    0.0
                }
            }
        }
    }))
    .buffered(concurrency.max(1))
    .collect::<Vec<f32>>()
    .await;

    average_score(&scores)
}

fn scale(value: usize, factor: f32) -> usize {
    ((value as f32 * factor).round() as usize).max(1)
}

fn schedule(period: Duration) -> tokio::time::Interval {
    // First tick lands one full period out, not immediately.
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365)
}
