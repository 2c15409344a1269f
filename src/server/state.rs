//! Server state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::config::ServerConfig;
use crate::classifier::Classifier;
use crate::hints::HintBook;

/// Application state shared across handlers.
///
/// Everything in here is immutable after startup; handlers only read it.
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Classification service
    pub classifier: Arc<Classifier>,
    /// Hint list
    pub hints: HintBook,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Monotonic start time
    start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig, classifier: Classifier) -> Self {
        Self {
            config,
            classifier: Arc::new(classifier),
            hints: HintBook::default(),
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    /// Replace the hint list
    pub fn with_hints(mut self, hints: HintBook) -> Self {
        self.hints = hints;
        self
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
