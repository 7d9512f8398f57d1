use serde::{Deserialize, Serialize};

/// Scores how promising a candidate is to evaluate next, trading off the
/// surrogate's predicted mean against its uncertainty.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Acquisition {
    #[default]
    ExpectedImprovement,
    UpperConfidenceBound,
    ProbabilityOfImprovement,
}

impl Acquisition {
    /// `best` is the best score observed so far, `beta` the exploration
    /// weight (UCB only).
    pub fn score(&self, mean: f32, variance: f32, best: f32, beta: f32) -> f32 {
        let sigma = variance.max(0.0).sqrt();
        match self {
            Acquisition::ExpectedImprovement => {
                if sigma <= 0.0 {
                    return 0.0;
                }
                let z = f64::from((mean - best) / sigma);
                let ei = f64::from(mean - best) * normal_cdf(z) + f64::from(sigma) * normal_pdf(z);
                ei.max(0.0) as f32
            }
            Acquisition::UpperConfidenceBound => mean + beta * sigma,
            Acquisition::ProbabilityOfImprovement => {
                if sigma <= 0.0 {
                    return if mean > best { 1.0 } else { 0.0 };
                }
                normal_cdf(f64::from((mean - best) / sigma)) as f32
            }
        }
    }
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Abramowitz–Stegun 7.1.26 rational approximation, max error ~1.5e-7.
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn cdf_matches_known_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn expected_improvement_is_zero_without_uncertainty() {
        let ei = Acquisition::ExpectedImprovement.score(0.9, 0.0, 0.5, 2.0);
        assert_eq!(ei, 0.0);
    }

    #[test]
    fn expected_improvement_grows_with_mean() {
        let low = Acquisition::ExpectedImprovement.score(0.4, 0.04, 0.5, 2.0);
        let high = Acquisition::ExpectedImprovement.score(0.8, 0.04, 0.5, 2.0);
        assert!(high > low);
        assert!(low >= 0.0);
    }

    #[test]
    fn ucb_adds_weighted_uncertainty() {
        let score = Acquisition::UpperConfidenceBound.score(0.5, 0.04, 0.0, 2.0);
        assert!((score - 0.9).abs() < 1e-6);
    }

    #[rstest]
    #[case(0.9, 1.0)]
    #[case(0.3, 0.0)]
    fn pi_degenerates_to_step_function(#[case] mean: f32, #[case] expected: f32) {
        let score = Acquisition::ProbabilityOfImprovement.score(mean, 0.0, 0.5, 2.0);
        assert_eq!(score, expected);
    }

    #[test]
    fn pi_is_half_at_the_incumbent() {
        let score = Acquisition::ProbabilityOfImprovement.score(0.5, 0.04, 0.5, 2.0);
        assert!((score - 0.5).abs() < 1e-3);
    }
}
