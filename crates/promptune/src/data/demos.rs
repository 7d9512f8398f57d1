use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::example::Example;

/// An [`Example`] the teacher solved well enough to use as a few-shot demo.
///
/// Produced by the demonstration miner, never mutated. `quality_score` is the
/// metric score of the teacher's trace on this example, in `[0, 1]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Demonstration {
    pub example: Example,
    pub quality_score: f32,
    pub demo_id: String,
}

impl Demonstration {
    pub fn new(example: Example, quality_score: f32) -> Self {
        Self {
            example,
            quality_score: quality_score.clamp(0.0, 1.0),
            demo_id: Uuid::new_v4().to_string(),
        }
    }
}

/// A candidate instruction string with an opaque id.
///
/// A finite pool of these is generated per compile; configurations reference
/// instructions by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Instruction {
    pub instruction_id: String,
    pub text: String,
}

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            instruction_id: Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    /// Normalized form used to deduplicate candidate pools: lowercased with
    /// collapsed whitespace.
    pub fn normalized_text(&self) -> String {
        self.text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}
