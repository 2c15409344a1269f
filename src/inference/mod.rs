//! Native image classification inference.
//!
//! The classifier is a ResNet-18 with a 3-class head, evaluated in pure Rust
//! on `ndarray` from weights in safetensors format.
//!
//! # Components
//!
//! - [`ModelStore`]: reads and validates the parameter file once per process
//! - [`ClassifierModel`]: immutable network, shared read-only via `Arc`
//! - [`infer`]: forward pass producing a [`ScoreVector`]
//! - [`StateDict`]: builds placeholder parameter files with the same layout
//!
//! # Parameter File
//!
//! A PyTorch state dict converts with:
//!
//! ```bash
//! python -c "import torch; from safetensors.torch import save_file; \
//!   save_file(torch.load('model.pth'), 'model.safetensors')"
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use flagnet::inference::{infer, ModelStore};
//! use flagnet::challenge::ClassLabelTable;
//!
//! let labels = ClassLabelTable::default();
//! let model = ModelStore::new("./models/classifier.safetensors", &labels).load()?;
//! let scores = infer(&model, &tensor)?;
//! ```

mod engine;
pub mod resnet;
mod store;
pub mod weights;

pub use engine::{infer, ScoreVector};
pub use resnet::{ResNetConfig, TensorSpec, ARCHITECTURE};
pub use store::{ClassifierModel, ModelInfo, ModelStore};
pub use weights::StateDict;

/// Default parameter file path
pub const DEFAULT_MODEL_PATH: &str = "./models/classifier.safetensors";
