//! Forward-pass execution.

use ndarray::Axis;

use super::store::ClassifierModel;
use crate::error::{FlagnetError, Result};
use crate::preprocess::InputTensor;

/// One raw score (logit) per class, in label-table order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVector {
    scores: Vec<f32>,
}

impl ScoreVector {
    /// Wrap raw scores
    pub fn new(scores: Vec<f32>) -> Self {
        Self { scores }
    }

    /// Raw scores
    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Softmax probabilities
    pub fn probabilities(&self) -> Vec<f32> {
        softmax(&self.scores)
    }
}

/// Softmax over a slice
fn softmax(x: &[f32]) -> Vec<f32> {
    let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = x.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// Run the model on a `[1, 3, H, W]` input.
///
/// Pure with respect to the model: nothing is cached or mutated, so the same
/// input always yields the same scores and concurrent calls need no locking.
pub fn infer(model: &ClassifierModel, input: &InputTensor) -> Result<ScoreVector> {
    let shape = input.shape();
    if shape.len() != 4 || shape[0] != 1 || shape[1] != model.network().config().in_channels {
        return Err(FlagnetError::Inference(format!(
            "expected input of shape [1, 3, H, W], got {shape:?}"
        )));
    }

    let image = input.view().index_axis_move(Axis(0), 0);
    let logits = model.network().forward(image)?;

    if logits.len() != model.num_classes() {
        return Err(FlagnetError::Inference(format!(
            "model produced {} scores for {} classes",
            logits.len(),
            model.num_classes()
        )));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(FlagnetError::Inference("non-finite score".into()));
    }

    Ok(ScoreVector::new(logits.to_vec()))
}
