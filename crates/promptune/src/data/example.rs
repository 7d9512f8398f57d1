use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A field-name to value map, in declaration order.
pub type FieldMap = IndexMap<String, Value>;

/// An input/output record from a training or validation set.
///
/// `data` holds every field; `input_keys` names the fields a program consumes.
/// Everything not listed in `input_keys` is a labeled output. Examples are
/// created once by the caller and never mutated afterwards.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Example {
    pub data: FieldMap,
    pub input_keys: Vec<String>,
}

impl Example {
    pub fn new(data: FieldMap, input_keys: Vec<String>) -> Self {
        let input_keys = input_keys
            .into_iter()
            .filter(|key| data.contains_key(key))
            .collect();
        Self { data, input_keys }
    }

    pub fn get(&self, key: &str, default: Option<&str>) -> Value {
        self.data
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::String(default.unwrap_or_default().to_string()))
    }

    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// The input slice of `data`, in `input_keys` order.
    pub fn inputs(&self) -> FieldMap {
        self.input_keys
            .iter()
            .filter_map(|key| self.data.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    /// The labeled (non-input) slice of `data`, in declaration order.
    pub fn labels(&self) -> FieldMap {
        self.data
            .iter()
            .filter(|(key, _)| !self.input_keys.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

/// Builds an [`Example`] from string pairs, marking `input_keys` as inputs.
///
/// Test and demo convenience; real callers usually deserialize examples.
pub fn example_from_pairs(pairs: &[(&str, &str)], input_keys: &[&str]) -> Example {
    let data = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();
    Example::new(data, input_keys.iter().map(|key| key.to_string()).collect())
}
