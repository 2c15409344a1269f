//! Hint lookup for stuck participants.

/// Built-in hints, from gentlest to most explicit.
pub const HINTS: [&str; 3] = [
    "Try modifying the image slightly to fool the model.",
    "Research adversarial attacks on image classifiers.",
    "Use a library like foolbox to generate adversarial examples.",
];

/// Ordered, immutable hint list.
#[derive(Debug, Clone)]
pub struct HintBook {
    hints: Vec<String>,
}

impl Default for HintBook {
    fn default() -> Self {
        Self {
            hints: HINTS.iter().map(|h| (*h).to_string()).collect(),
        }
    }
}

impl HintBook {
    /// Create from custom hints. Returns `None` if the list is empty.
    pub fn new(hints: Vec<String>) -> Option<Self> {
        if hints.is_empty() {
            None
        } else {
            Some(Self { hints })
        }
    }

    /// Hint for an attempt number, clamped into the valid range.
    ///
    /// Negative attempts get the first hint, attempts past the end get the last.
    pub fn hint(&self, attempt: i64) -> &str {
        let last = self.hints.len() - 1;
        let index = usize::try_from(attempt.max(0)).map_or(last, |i| i.min(last));
        &self.hints[index]
    }

    /// Number of hints
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Always false; hint books are non-empty by construction
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}
