use bon::Builder;

use super::space::{Configuration, Observation};

/// Predictive model of metric score from configuration features.
///
/// The interface is Gaussian-process shaped: `fit` on the observation log,
/// `predict` a `(mean, variance)` pair per candidate. `predict` must be pure
/// and deterministic for a fixed set of observations, and variance must never
/// go negative. Richer models can replace [`LinearSurrogate`] behind this
/// trait as long as cold-start behavior stays well-defined.
pub trait Surrogate: Send + Sync {
    fn fit(&mut self, observations: &[Observation]);
    fn predict(&self, candidate: &Configuration) -> (f32, f32);
}

/// Least-squares regression over the first feature dimension, with a
/// degenerate fallback for cold start.
///
/// Fewer than two observations (or a feature column with no spread) predicts
/// the average observed score — `0.5` with no observations at all — at
/// `prior_variance`. Otherwise `mean = slope·x + intercept` and
/// `variance = prior_variance + noise_variance`.
#[derive(Builder, Debug, Clone)]
pub struct LinearSurrogate {
    #[builder(default = 0.25)]
    pub prior_variance: f32,

    #[builder(default = 0.01)]
    pub noise_variance: f32,

    #[builder(skip)]
    state: FitState,
}

#[derive(Debug, Clone, Copy, Default)]
enum FitState {
    #[default]
    Empty,
    Mean(f32),
    Line {
        slope: f32,
        intercept: f32,
    },
}

impl Default for LinearSurrogate {
    fn default() -> Self {
        LinearSurrogate::builder().build()
    }
}

impl Surrogate for LinearSurrogate {
    fn fit(&mut self, observations: &[Observation]) {
        if observations.is_empty() {
            self.state = FitState::Empty;
            return;
        }

        let n = observations.len() as f64;
        let mean_y = observations.iter().map(|obs| f64::from(obs.score)).sum::<f64>() / n;
        self.state = FitState::Mean(mean_y as f32);
        if observations.len() < 2 {
            return;
        }

        let xs = observations
            .iter()
            .map(|obs| f64::from(obs.configuration.features.first().copied().unwrap_or(0.0)));
        let mean_x = xs.clone().sum::<f64>() / n;
        let covariance: f64 = xs
            .clone()
            .zip(observations.iter().map(|obs| f64::from(obs.score)))
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let x_spread: f64 = xs.map(|x| (x - mean_x).powi(2)).sum();

        if x_spread <= f64::EPSILON {
            return;
        }

        let slope = covariance / x_spread;
        self.state = FitState::Line {
            slope: slope as f32,
            intercept: (mean_y - slope * mean_x) as f32,
        };
    }

    fn predict(&self, candidate: &Configuration) -> (f32, f32) {
        match self.state {
            FitState::Empty => (0.5, self.prior_variance),
            FitState::Mean(mean) => (mean, self.prior_variance),
            FitState::Line { slope, intercept } => {
                let x = candidate.features.first().copied().unwrap_or(0.0);
                let mean = slope * x + intercept;
                let variance = (self.prior_variance + self.noise_variance).max(0.0);
                (mean, variance)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Instruction;
    use crate::optimize::space::SearchSpace;

    fn one_instruction_space() -> SearchSpace {
        SearchSpace::new(vec![Instruction::new("i")], vec![], 0)
    }

    fn observation(space: &SearchSpace, score: f32) -> Observation {
        let config = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        Observation::after(config, score, None)
    }

    #[test]
    fn cold_start_with_no_observations() {
        let space = one_instruction_space();
        let candidate = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        let surrogate = LinearSurrogate::default();
        let (mean, variance) = surrogate.predict(&candidate);
        assert_eq!(mean, 0.5);
        assert_eq!(variance, 0.25);
    }

    #[test]
    fn single_observation_predicts_its_score() {
        let space = one_instruction_space();
        let candidate = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        let mut surrogate = LinearSurrogate::default();
        surrogate.fit(&[observation(&space, 0.8)]);
        let (mean, variance) = surrogate.predict(&candidate);
        assert!((mean - 0.8).abs() < 1e-6);
        assert!(variance >= 0.0);
    }

    #[test]
    fn identical_features_fall_back_to_mean() {
        let space = one_instruction_space();
        let candidate = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        let mut surrogate = LinearSurrogate::default();
        surrogate.fit(&[observation(&space, 0.2), observation(&space, 0.8)]);
        let (mean, variance) = surrogate.predict(&candidate);
        assert!((mean - 0.5).abs() < 1e-6);
        assert!(variance >= 0.0);
    }

    #[test]
    fn refit_replaces_previous_state() {
        let space = one_instruction_space();
        let candidate = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        let mut surrogate = LinearSurrogate::default();
        surrogate.fit(&[observation(&space, 0.9)]);
        surrogate.fit(&[]);
        assert_eq!(surrogate.predict(&candidate).0, 0.5);
    }
}
