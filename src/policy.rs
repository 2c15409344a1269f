//! Decision policy: top-scoring class to response.
//!
//! The policy is the only place the secret can leave the process. It is
//! returned if and only if the argmax label equals the target label.

use serde::Serialize;

use crate::challenge::{ClassLabelTable, Secret};

/// Outcome of one classification.
///
/// Serializes as `{"prediction": "<label>"}` or `{"flag": "<secret>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PredictionResult {
    /// A non-target label was predicted.
    #[serde(rename = "prediction")]
    Label(String),
    /// The target label was predicted; carries the secret payload.
    #[serde(rename = "flag")]
    Flag(Secret),
}

impl PredictionResult {
    /// Whether this result reveals the secret
    pub fn is_flag(&self) -> bool {
        matches!(self, PredictionResult::Flag(_))
    }

    /// Predicted label, `None` for the secret variant
    pub fn label(&self) -> Option<&str> {
        match self {
            PredictionResult::Label(label) => Some(label),
            PredictionResult::Flag(_) => None,
        }
    }
}

/// Index of the first maximum score.
///
/// NaN never wins. Returns 0 when `scores` is empty or all NaN.
pub fn argmax(scores: &[f32]) -> usize {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {},
            _ => best = Some((i, score)),
        }
    }
    best.map_or(0, |(i, _)| i)
}

/// Map scores to a response.
///
/// `scores` must be non-empty and as long as `labels`; the inference engine
/// guarantees both.
pub fn decide(
    scores: &[f32],
    labels: &ClassLabelTable,
    target_label: &str,
    secret: &Secret,
) -> PredictionResult {
    let index = argmax(scores);
    let label = labels.get(index).unwrap_or_default();

    if label == target_label {
        PredictionResult::Flag(secret.clone())
    } else {
        PredictionResult::Label(label.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{SECRET, TARGET_LABEL};
    use proptest::prelude::*;

    fn labels() -> ClassLabelTable {
        ClassLabelTable::default()
    }

    #[test]
    fn test_argmax_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[0.5, 0.5, 0.5]), 0);
        assert_eq!(argmax(&[0.1, 0.9, 0.9]), 1);
        assert_eq!(argmax(&[-3.0, -1.0, -2.0]), 1);
    }

    #[test]
    fn test_argmax_ignores_nan() {
        assert_eq!(argmax(&[f32::NAN, 0.2, 0.1]), 1);
        assert_eq!(argmax(&[f32::NAN, f32::NAN]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn test_decide_label() {
        let result = decide(&[2.0, 1.0, 0.0], &labels(), TARGET_LABEL, &Secret::default());
        assert_eq!(result, PredictionResult::Label("cat".into()));
        assert_eq!(result.label(), Some("cat"));
        assert!(!result.is_flag());
    }

    #[test]
    fn test_decide_flag() {
        let result = decide(&[0.0, 1.0, 2.0], &labels(), TARGET_LABEL, &Secret::default());
        assert!(result.is_flag());
        assert_eq!(result.label(), None);
    }

    #[test]
    fn test_tie_with_target_goes_to_lower_index() {
        let result = decide(&[0.0, 3.0, 3.0], &labels(), TARGET_LABEL, &Secret::default());
        assert_eq!(result, PredictionResult::Label("dog".into()));
    }

    #[test]
    fn test_wire_format() {
        let label = PredictionResult::Label("dog".into());
        assert_eq!(serde_json::to_string(&label).unwrap(), r#"{"prediction":"dog"}"#);

        let flag = PredictionResult::Flag(Secret::default());
        assert_eq!(
            serde_json::to_string(&flag).unwrap(),
            format!(r#"{{"flag":"{SECRET}"}}"#)
        );
    }

    #[test]
    fn test_custom_label_order() {
        let table = ClassLabelTable::new(["flag", "cat", "dog"]).unwrap();
        let result = decide(&[5.0, 1.0, 1.0], &table, "flag", &Secret::default());
        assert!(result.is_flag());

        let result = decide(&[1.0, 1.0, 5.0], &table, "flag", &Secret::default());
        assert_eq!(result.label(), Some("dog"));
    }

    proptest! {
        #[test]
        fn prop_decide_matches_argmax(
            scores in prop::collection::vec(-100.0f32..100.0, 3),
            order in Just(vec!["a", "b", "c"]).prop_shuffle(),
        ) {
            let table = ClassLabelTable::new(order.clone()).unwrap();
            let result = decide(&scores, &table, "c", &Secret::new("s3cret"));

            let top = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let first = scores.iter().position(|&s| s == top).unwrap();

            if order[first] == "c" {
                prop_assert!(result.is_flag());
            } else {
                prop_assert_eq!(result.label(), Some(order[first]));
            }
        }
    }
}
