use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::{Demonstration, Instruction};

/// One point in the search space: an instruction paired with an ordered
/// demo subset, plus the numeric embedding the surrogate model consumes.
///
/// Configurations compare and hash by `(instruction_id, demo_ids)` only;
/// the feature vector is derived data.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Configuration {
    pub instruction_id: String,
    pub demo_ids: Vec<String>,
    pub features: Vec<f32>,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.instruction_id == other.instruction_id && self.demo_ids == other.demo_ids
    }
}

impl Eq for Configuration {}

impl Hash for Configuration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.instruction_id.hash(state);
        self.demo_ids.hash(state);
    }
}

/// A completed objective evaluation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Observation {
    pub configuration: Configuration,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Stamps an observation strictly after `previous`. Clock ties within one
    /// run are bumped by a nanosecond so timestamps stay strictly monotonic.
    pub fn after(
        configuration: Configuration,
        score: f32,
        previous: Option<DateTime<Utc>>,
    ) -> Self {
        let mut timestamp = Utc::now();
        if let Some(previous) = previous {
            if timestamp <= previous {
                timestamp = previous + ChronoDuration::nanoseconds(1);
            }
        }
        Self {
            configuration,
            score,
            timestamp,
        }
    }
}

/// The immutable search space built once per compile.
///
/// Instructions and demos are read-only snapshots from here on; the optimizer
/// only references them by id.
#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub instructions: Vec<Instruction>,
    pub demos: Vec<Demonstration>,
    pub max_demos_per_config: usize,
}

impl SearchSpace {
    pub fn new(
        instructions: Vec<Instruction>,
        demos: Vec<Demonstration>,
        max_demos_per_config: usize,
    ) -> Self {
        Self {
            instructions,
            demos,
            max_demos_per_config,
        }
    }

    /// Whether the space can produce any valid configuration.
    ///
    /// An empty instruction pool fails closed. An empty demo pool fails
    /// closed only while demos are load-bearing (`max_demos_per_config > 0`);
    /// with a demo cap of zero, instruction-only configurations remain valid.
    pub fn yields_candidates(&self) -> bool {
        if self.instructions.is_empty() {
            return false;
        }
        self.max_demos_per_config == 0 || !self.demos.is_empty()
    }

    fn max_subset_len(&self) -> usize {
        self.max_demos_per_config.min(self.demos.len())
    }

    pub fn instruction(&self, instruction_id: &str) -> Option<&Instruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.instruction_id == instruction_id)
    }

    pub fn demo(&self, demo_id: &str) -> Option<&Demonstration> {
        self.demos.iter().find(|demo| demo.demo_id == demo_id)
    }

    pub fn resolve_demos(&self, demo_ids: &[String]) -> Vec<Demonstration> {
        demo_ids
            .iter()
            .filter_map(|id| self.demo(id).cloned())
            .collect()
    }

    /// Builds a configuration with its feature embedding attached.
    pub fn configuration(&self, instruction_id: String, demo_ids: Vec<String>) -> Configuration {
        let features = self.extract_features(&instruction_id, &demo_ids);
        Configuration {
            instruction_id,
            demo_ids,
            features,
        }
    }

    /// Deterministic numeric embedding of a configuration.
    ///
    /// Dimension 0 is a stable hash of the instruction id projected into
    /// `[0, 1]`, dimension 1 the normalized demo count, dimension 2 a hash
    /// summary of the (order-insensitive) demo-id set. Hash collisions are
    /// acceptable noise for the surrogate.
    pub fn extract_features(&self, instruction_id: &str, demo_ids: &[String]) -> Vec<f32> {
        let demo_norm = demo_ids.len() as f32 / self.max_demos_per_config.max(1) as f32;
        let mut sorted_ids: Vec<&str> = demo_ids.iter().map(String::as_str).collect();
        sorted_ids.sort_unstable();
        vec![
            stable_unit_hash(instruction_id),
            demo_norm,
            stable_unit_hash(&sorted_ids.join("|")),
        ]
    }

    /// Draws a uniformly random configuration: random instruction, uniform
    /// subset size in `[0, min(max_demos, |demos|)]`, demos sampled without
    /// replacement in pool order.
    pub fn random_configuration(&self, rng: &mut StdRng) -> Option<Configuration> {
        if !self.yields_candidates() {
            return None;
        }
        let instruction = &self.instructions[rng.gen_range(0..self.instructions.len())];
        let subset_len = rng.gen_range(0..=self.max_subset_len());
        let mut picked = rand::seq::index::sample(rng, self.demos.len(), subset_len).into_vec();
        picked.sort_unstable();
        let demo_ids = picked
            .into_iter()
            .map(|idx| self.demos[idx].demo_id.clone())
            .collect();
        Some(self.configuration(instruction.instruction_id.clone(), demo_ids))
    }

    /// Total number of distinct configurations, saturating at `cap`.
    pub fn total_configurations(&self, cap: usize) -> usize {
        if !self.yields_candidates() {
            return 0;
        }
        let mut subsets: u128 = 0;
        for k in 0..=self.max_subset_len() {
            subsets = subsets.saturating_add(binomial(self.demos.len(), k));
            if subsets >= cap as u128 {
                return cap;
            }
        }
        let total = subsets.saturating_mul(self.instructions.len() as u128);
        total.min(cap as u128) as usize
    }

    /// Exhaustively enumerates every configuration, in deterministic
    /// (instruction order × subset-size × index-lexicographic) order. Only
    /// sensible for small spaces; callers gate on [`total_configurations`].
    ///
    /// [`total_configurations`]: SearchSpace::total_configurations
    pub fn enumerate_all(&self) -> Vec<Configuration> {
        if !self.yields_candidates() {
            return Vec::new();
        }
        let mut configurations = Vec::new();
        for instruction in &self.instructions {
            for k in 0..=self.max_subset_len() {
                for combo in index_combinations(self.demos.len(), k) {
                    let demo_ids = combo
                        .into_iter()
                        .map(|idx| self.demos[idx].demo_id.clone())
                        .collect();
                    configurations
                        .push(self.configuration(instruction.instruction_id.clone(), demo_ids));
                }
            }
        }
        configurations
    }
}

/// Stable per-process hash of a string projected into `[0, 1]`.
fn stable_unit_hash(value: &str) -> f32 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    (hasher.finish() % 10_000) as f32 / 10_000.0
}

fn binomial(n: usize, k: usize) -> u128 {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result.saturating_mul((n - i) as u128) / (i as u128 + 1);
    }
    result
}

fn index_combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    if k == 0 {
        return vec![Vec::new()];
    }
    if k > n {
        return Vec::new();
    }
    let mut combos = Vec::new();
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        combos.push(indices.clone());
        let mut i = k;
        loop {
            if i == 0 {
                return combos;
            }
            i -= 1;
            if indices[i] != n - k + i {
                break;
            }
        }
        indices[i] += 1;
        for j in i + 1..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::data::example_from_pairs;

    fn demo(tag: &str) -> Demonstration {
        Demonstration::new(example_from_pairs(&[("q", tag), ("a", tag)], &["q"]), 1.0)
    }

    fn space(instructions: usize, demos: usize, cap: usize) -> SearchSpace {
        SearchSpace::new(
            (0..instructions)
                .map(|i| Instruction::new(format!("instruction {i}")))
                .collect(),
            (0..demos).map(|i| demo(&format!("d{i}"))).collect(),
            cap,
        )
    }

    #[test]
    fn equality_ignores_features() {
        let space = space(1, 2, 2);
        let id = space.instructions[0].instruction_id.clone();
        let mut a = space.configuration(id.clone(), vec![]);
        let b = space.configuration(id, vec![]);
        a.features = vec![9.0, 9.0, 9.0];
        assert_eq!(a, b);
    }

    #[test]
    fn features_are_deterministic_and_bounded() {
        let space = space(1, 3, 3);
        let demo_ids: Vec<String> = space.demos.iter().map(|d| d.demo_id.clone()).collect();
        let first = space.extract_features("instr", &demo_ids);
        let second = space.extract_features("instr", &demo_ids);
        assert_eq!(first, second);
        assert!(first.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn feature_demo_summary_is_order_insensitive() {
        let space = space(1, 2, 2);
        let ids: Vec<String> = space.demos.iter().map(|d| d.demo_id.clone()).collect();
        let forward = space.extract_features("i", &ids);
        let reversed: Vec<String> = ids.iter().rev().cloned().collect();
        let backward = space.extract_features("i", &reversed);
        assert_eq!(forward[2], backward[2]);
    }

    #[test]
    fn empty_instructions_fail_closed() {
        assert!(!space(0, 3, 2).yields_candidates());
        assert_eq!(space(0, 3, 2).total_configurations(100), 0);
    }

    #[test]
    fn empty_demos_fail_closed_only_when_load_bearing() {
        assert!(!space(2, 0, 2).yields_candidates());
        assert!(space(2, 0, 0).yields_candidates());
    }

    #[test]
    fn enumeration_counts_match() {
        let space = space(2, 3, 2);
        // 2 instructions × (C(3,0) + C(3,1) + C(3,2)) = 2 × 7
        assert_eq!(space.total_configurations(1000), 14);
        let all = space.enumerate_all();
        assert_eq!(all.len(), 14);
        let unique: std::collections::HashSet<_> = all.iter().cloned().collect();
        assert_eq!(unique.len(), 14);
    }

    #[test]
    fn random_configurations_respect_the_cap() {
        let space = space(2, 5, 3);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let config = space.random_configuration(&mut rng).unwrap();
            assert!(config.demo_ids.len() <= 3);
            let unique: std::collections::HashSet<_> = config.demo_ids.iter().collect();
            assert_eq!(unique.len(), config.demo_ids.len());
        }
    }

    #[test]
    fn observations_get_strictly_increasing_timestamps() {
        let space = space(1, 0, 0);
        let config = space.configuration(space.instructions[0].instruction_id.clone(), vec![]);
        let first = Observation::after(config.clone(), 0.5, None);
        let second = Observation::after(config, 0.5, Some(first.timestamp));
        assert!(second.timestamp > first.timestamp);
    }
}
