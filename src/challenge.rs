//! Fixed challenge data: label order, target class, secret payload.
//!
//! These values are part of the challenge contract. The label order must
//! match the order the parameter file was trained with; the loader checks the
//! count, but only the training pipeline knows the order.

use std::fmt;

use serde::Serialize;

/// Class labels in model output order.
pub const CLASS_LABELS: [&str; 3] = ["cat", "dog", "flag"];

/// Label whose prediction reveals the secret.
pub const TARGET_LABEL: &str = "flag";

/// Secret payload returned when the target label is predicted.
pub const SECRET: &str = "CTF{adversarial_attack_successful}";

/// Ordered class labels; position equals model output index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelTable {
    labels: Vec<String>,
}

impl Default for ClassLabelTable {
    fn default() -> Self {
        Self {
            labels: CLASS_LABELS.iter().map(|l| (*l).to_string()).collect(),
        }
    }
}

impl ClassLabelTable {
    /// Build a table from labels in output order.
    ///
    /// Returns `None` for an empty list: a classifier needs at least one class.
    pub fn new<I, S>(labels: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            None
        } else {
            Some(Self { labels })
        }
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always false; tables are non-empty by construction
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Label at an output index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Labels in output order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

/// Secret payload with a redacted `Debug`/`Display`.
///
/// The value only leaves the process through serialization of a
/// [`PredictionResult::Flag`](crate::policy::PredictionResult::Flag).
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw secret value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Default for Secret {
    fn default() -> Self {
        Self::new(SECRET)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label_order() {
        let table = ClassLabelTable::default();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0), Some("cat"));
        assert_eq!(table.get(1), Some("dog"));
        assert_eq!(table.get(2), Some(TARGET_LABEL));
        assert_eq!(table.get(3), None);
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(ClassLabelTable::new(Vec::<String>::new()).is_none());
    }

    #[test]
    fn test_secret_redacted() {
        let secret = Secret::default();
        assert!(!format!("{secret:?}").contains("CTF"));
        assert!(!secret.to_string().contains("CTF"));
        assert_eq!(secret.expose(), SECRET);
        assert_eq!(serde_json::to_string(&secret).unwrap(), format!("\"{SECRET}\""));
    }
}
