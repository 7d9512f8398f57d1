use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::core::{CallOptions, ProgramRunner, forward_with_timeout};
use crate::data::{Demonstration, Example, FieldMap};
use crate::evaluate::SafeMetric;

/// Bootstrap-few-shot demonstration miner.
///
/// Runs the teacher over every training example, scores each trace with the
/// metric, and keeps the highest-quality traces as few-shot demonstrations.
/// A demonstration's fields are the example's inputs plus the *teacher's*
/// outputs — the trace is the thing worth imitating, the reference labels
/// only grade it.
///
/// Failures are per-example: a timeout, transport error, or malformed output
/// drops that one candidate and the batch continues. A teacher that fails on
/// every example yields an empty pool, not an error — the caller decides
/// whether that is fatal.
#[derive(Builder, Debug, Clone)]
pub struct DemonstrationMiner {
    /// Traces scoring below this are discarded.
    #[builder(default = 0.7)]
    pub quality_threshold: f32,

    /// Pool cap: the miner keeps at most this many demonstrations.
    #[builder(default = 4)]
    pub max_demos: usize,

    /// Maximum in-flight teacher calls.
    #[builder(default = 20)]
    pub concurrency: usize,

    #[builder(default = Duration::from_secs(60))]
    pub per_example_timeout: Duration,
}

impl DemonstrationMiner {
    pub async fn mine(
        &self,
        teacher: &Arc<dyn ProgramRunner>,
        trainset: &[Example],
        metric: &SafeMetric,
    ) -> Vec<Demonstration> {
        if self.max_demos == 0 || trainset.is_empty() {
            return Vec::new();
        }

        let required_outputs = teacher.descriptor().output_fields;
        let correlation_id = Uuid::new_v4().to_string();

        let traces = futures::stream::iter(trainset.iter().cloned().enumerate().map(|(index, example)| {
            let teacher = Arc::clone(teacher);
            let options = CallOptions::new(self.per_example_timeout, correlation_id.clone());
            let required_outputs = &required_outputs;
            async move {
                let outputs =
                    match forward_with_timeout(teacher.as_ref(), example.inputs(), &options).await {
                        Ok(outputs) => outputs,
                        Err(err) => {
                            debug!(index, error = %err, "teacher call failed; dropping example");
                            return None;
                        }
                    };

                if let Some(missing) = missing_field(&outputs, required_outputs) {
                    debug!(index, field = %missing, "teacher output missing field; dropping");
                    return None;
                }

                Some((index, example.clone(), outputs))
            }
        }))
        .buffered(self.concurrency.max(1))
        .filter_map(|trace| async move { trace })
        .collect::<Vec<_>>()
        .await;

        let mut scored = Vec::with_capacity(traces.len());
        for (index, example, outputs) in traces {
            let score = metric.score(&example, &outputs).await;
            if score < self.quality_threshold {
                debug!(index, score, "trace below quality threshold; dropping");
                continue;
            }
            scored.push((index, example, outputs, score));
        }

        // Quality descending; original trainset order breaks ties.
        scored.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        scored
            .into_iter()
            .take(self.max_demos)
            .map(|(_, example, outputs, score)| {
                Demonstration::new(trace_example(&example, outputs), score)
            })
            .collect()
    }
}

fn missing_field<'a>(outputs: &FieldMap, required: &'a [String]) -> Option<&'a String> {
    required.iter().find(|field| !outputs.contains_key(*field))
}

/// Inputs from the training example joined with the teacher's outputs.
fn trace_example(example: &Example, outputs: FieldMap) -> Example {
    let mut data = example.inputs();
    data.extend(outputs);
    Example::new(data, example.input_keys.clone())
}
