use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::data::{Example, FieldMap};

/// How callers tell the optimizer what "good" means.
///
/// Scores a prediction against a ground-truth example, 0.0–1.0 by convention.
/// User metrics may fail; the engine always evaluates them through
/// [`SafeMetric`], which converts failures to `0.0`.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn score(&self, example: &Example, prediction: &FieldMap) -> Result<f32>;
}

/// Wraps a user metric so it never raises: errors become `0.0` and a warning.
pub struct SafeMetric {
    inner: Arc<dyn Metric>,
}

impl SafeMetric {
    pub fn new(inner: Arc<dyn Metric>) -> Self {
        Self { inner }
    }

    pub async fn score(&self, example: &Example, prediction: &FieldMap) -> f32 {
        match self.inner.score(example, prediction).await {
            Ok(score) => score,
            Err(err) => {
                warn!(error = %err, "metric failed; scoring 0.0");
                0.0
            }
        }
    }
}

/// `1.0` when the prediction's value for `field` equals the example's label,
/// else `0.0`.
pub struct ExactMatch {
    field: String,
}

impl ExactMatch {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

#[async_trait]
impl Metric for ExactMatch {
    async fn score(&self, example: &Example, prediction: &FieldMap) -> Result<f32> {
        let expected = example.data.get(&self.field);
        let got = prediction.get(&self.field);
        Ok(match (expected, got) {
            (Some(expected), Some(got)) if expected == got => 1.0,
            _ => 0.0,
        })
    }
}

/// Fraction of the example's labeled fields the prediction reproduces exactly.
pub struct PartialCredit;

impl PartialCredit {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Metric for PartialCredit {
    async fn score(&self, example: &Example, prediction: &FieldMap) -> Result<f32> {
        let labels = example.labels();
        if labels.is_empty() {
            return Ok(0.0);
        }

        let matched = labels
            .iter()
            .filter(|(key, expected)| prediction.get(*key) == Some(expected))
            .count();
        Ok(matched as f32 / labels.len() as f32)
    }
}

/// Arithmetic mean of a score slice; `0.0` when empty.
pub fn average_score(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::data::example_from_pairs;

    struct AlwaysFails;

    #[async_trait]
    impl Metric for AlwaysFails {
        async fn score(&self, _example: &Example, _prediction: &FieldMap) -> Result<f32> {
            Err(anyhow!("metric failure"))
        }
    }

    fn qa_example() -> Example {
        example_from_pairs(&[("question", "2+2?"), ("answer", "4")], &["question"])
    }

    #[tokio::test]
    async fn exact_match_scores_binary() {
        let metric = ExactMatch::new("answer");
        let example = qa_example();

        let mut good = FieldMap::new();
        good.insert("answer".to_string(), "4".into());
        assert_eq!(metric.score(&example, &good).await.unwrap(), 1.0);

        let mut bad = FieldMap::new();
        bad.insert("answer".to_string(), "5".into());
        assert_eq!(metric.score(&example, &bad).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn partial_credit_is_fractional() {
        let example = example_from_pairs(
            &[("q", "x"), ("a", "1"), ("b", "2")],
            &["q"],
        );
        let mut prediction = FieldMap::new();
        prediction.insert("a".to_string(), "1".into());
        prediction.insert("b".to_string(), "wrong".into());

        let score = PartialCredit::new()
            .score(&example, &prediction)
            .await
            .unwrap();
        assert!((score - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn safe_metric_absorbs_failures() {
        let safe = SafeMetric::new(Arc::new(AlwaysFails));
        let score = safe.score(&qa_example(), &FieldMap::new()).await;
        assert_eq!(score, 0.0);
    }

    #[test]
    fn average_of_empty_is_zero() {
        assert_eq!(average_score(&[]), 0.0);
        assert_eq!(average_score(&[0.5, 1.0]), 0.75);
    }
}
