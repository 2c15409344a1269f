//! In-memory state dicts and safetensors export.
//!
//! Used to produce placeholder parameter files with the exact layout the
//! loader expects, so the service can run before trained weights exist.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use safetensors::tensor::TensorView;
use safetensors::Dtype;

use super::resnet::{ResNetConfig, ARCHITECTURE};
use crate::error::{FlagnetError, Result};

/// Named `f32` tensors, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, (Vec<usize>, Vec<f32>)>,
}

impl StateDict {
    /// Empty state dict
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic untrained weights for `config`.
    ///
    /// Conv and linear weights are uniform in `±1/sqrt(fan_in)` (PyTorch's
    /// default init), batch norm is the identity, biases are zero. The same
    /// seed always yields the same tensors.
    pub fn placeholder(config: &ResNetConfig, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut dict = Self::new();

        for spec in config.layout() {
            let numel = spec.numel();
            let values = if spec.shape.len() > 1 {
                let fan_in: usize = spec.shape[1..].iter().product();
                let bound = 1.0 / (fan_in as f32).sqrt();
                (0..numel).map(|_| rng.gen_range(-bound..bound)).collect()
            } else if spec.name.ends_with(".running_var") || spec.name.ends_with(".weight") {
                vec![1.0; numel]
            } else {
                vec![0.0; numel]
            };
            dict.tensors.insert(spec.name, (spec.shape, values));
        }

        dict
    }

    /// Insert or replace a tensor.
    pub fn insert(&mut self, name: impl Into<String>, shape: Vec<usize>, values: Vec<f32>) -> Result<()> {
        let name = name.into();
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(FlagnetError::ModelLoad(format!(
                "Tensor '{name}' has {} values for shape {shape:?}",
                values.len()
            )));
        }
        self.tensors.insert(name, (shape, values));
        Ok(())
    }

    /// Remove a tensor, returning its shape and values
    pub fn remove(&mut self, name: &str) -> Option<(Vec<usize>, Vec<f32>)> {
        self.tensors.remove(name)
    }

    /// Look up a tensor
    pub fn get(&self, name: &str) -> Option<(&[usize], &[f32])> {
        self.tensors
            .get(name)
            .map(|(shape, values)| (shape.as_slice(), values.as_slice()))
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Serialize to the safetensors format (`F32`, little-endian).
    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>> {
        let raw: Vec<(&str, &[usize], Vec<u8>)> = self
            .tensors
            .iter()
            .map(|(name, (shape, values))| {
                let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name.as_str(), shape.as_slice(), bytes)
            })
            .collect();

        let mut views = Vec::with_capacity(raw.len());
        for (name, shape, bytes) in &raw {
            let view = TensorView::new(Dtype::F32, shape.to_vec(), bytes).map_err(|e| {
                FlagnetError::ModelLoad(format!("Failed to build tensor '{name}': {e}"))
            })?;
            views.push((*name, view));
        }

        let metadata = HashMap::from([
            ("format".to_string(), "pt".to_string()),
            ("architecture".to_string(), ARCHITECTURE.to_string()),
        ]);

        safetensors::serialize(views, &Some(metadata))
            .map_err(|e| FlagnetError::ModelLoad(format!("Failed to serialize safetensors: {e}")))
    }

    /// Write a safetensors file
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_safetensors_bytes()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}
