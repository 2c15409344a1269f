//! # Flagnet - Adversarial Image Classification Challenge
//!
//! Serves a fixed, pre-trained image classifier for adversarial-robustness
//! challenges. A client uploads an image and gets the predicted category; if
//! the model predicts the target category, the response carries the secret
//! flag instead.
//!
//! The classifier is deliberately undefended. What this crate guarantees is a
//! *stable* attack surface: preprocessing and inference are bit-for-bit
//! deterministic and reproduce the training-time transform exactly.
//!
//! ## Pipeline
//!
//! ```text
//! upload bytes
//!      │ Preprocessor::decode          (InvalidImage on garbage)
//!      v
//! RawImage ── Preprocessor::preprocess ──> InputTensor [1, 3, 224, 224]
//!      │
//!      v
//! inference::infer(&ClassifierModel) ──> ScoreVector [cat, dog, flag]
//!      │
//!      v
//! policy::decide ──> {"prediction": "dog"}  |  {"flag": "CTF{...}"}
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flagnet::{ClassLabelTable, Classifier, ModelStore};
//!
//! let labels = ClassLabelTable::default();
//! let model = ModelStore::new("./models/classifier.safetensors", &labels).load()?;
//! let classifier = Classifier::new(Arc::new(model))?;
//!
//! let bytes = std::fs::read("cat.png")?;
//! let result = classifier.classify(&bytes)?;
//! println!("{}", serde_json::to_string(&result)?);
//! ```
//!
//! ## Modules
//!
//! - [`preprocess`]: image decoding and tensor normalization
//! - [`inference`]: native ResNet-18, model store, forward pass
//! - [`policy`]: argmax and secret-revealing decision
//! - [`classifier`]: end-to-end classification service
//! - [`hints`]: clamped hint lookup
//! - [`challenge`]: fixed labels, target and secret
//! - [`server`]: HTTP API server (Axum-based)
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod challenge;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hints;
pub mod inference;
pub mod policy;
pub mod preprocess;
pub mod server;

// Re-exports for convenience
pub use challenge::{ClassLabelTable, Secret, CLASS_LABELS, SECRET, TARGET_LABEL};
pub use classifier::Classifier;
pub use config::Config;
pub use error::{FlagnetError, Result};
pub use hints::{HintBook, HINTS};
pub use inference::{infer, ClassifierModel, ModelInfo, ModelStore, ScoreVector, StateDict};
pub use policy::{decide, PredictionResult};
pub use preprocess::{InputTensor, Preprocessor, RawImage};
pub use server::{AppState, ServerConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
