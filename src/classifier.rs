//! Classification service: bytes in, challenge response out.

use std::sync::Arc;
use std::time::Instant;

use crate::challenge::{ClassLabelTable, Secret, TARGET_LABEL};
use crate::error::{FlagnetError, Result};
use crate::inference::{infer, ClassifierModel, ModelInfo};
use crate::policy::{self, PredictionResult};
use crate::preprocess::Preprocessor;

/// Decode → preprocess → infer → decide, for one upload at a time.
///
/// Holds only immutable data, so one instance serves concurrent requests.
#[derive(Debug, Clone)]
pub struct Classifier {
    model: Arc<ClassifierModel>,
    preprocessor: Preprocessor,
    labels: ClassLabelTable,
    target_label: String,
    secret: Secret,
}

impl Classifier {
    /// Classifier with the challenge's labels, target and secret.
    ///
    /// Fails if the model's output size differs from the label table.
    pub fn new(model: Arc<ClassifierModel>) -> Result<Self> {
        Self::with_labels(
            model,
            ClassLabelTable::default(),
            TARGET_LABEL,
            Secret::default(),
        )
    }

    /// Classifier with custom labels, target and secret.
    pub fn with_labels(
        model: Arc<ClassifierModel>,
        labels: ClassLabelTable,
        target_label: impl Into<String>,
        secret: Secret,
    ) -> Result<Self> {
        if model.num_classes() != labels.len() {
            return Err(FlagnetError::ModelLoad(format!(
                "Model has {} output classes, label table has {}",
                model.num_classes(),
                labels.len()
            )));
        }

        Ok(Self {
            model,
            preprocessor: Preprocessor::new(),
            labels,
            target_label: target_label.into(),
            secret,
        })
    }

    /// Replace the preprocessor (e.g. a different upload pixel limit)
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Description of the underlying model
    pub fn model_info(&self) -> &ModelInfo {
        self.model.info()
    }

    /// Class labels in output order
    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    /// Classify one uploaded image.
    ///
    /// Undecodable input fails with [`FlagnetError::InvalidImage`] before any
    /// numeric work. Identical bytes always produce identical results.
    pub fn classify(&self, raw_bytes: &[u8]) -> Result<PredictionResult> {
        let start = Instant::now();

        let image = self.preprocessor.decode(raw_bytes)?;
        let (width, height) = (image.width(), image.height());
        let tensor = self.preprocessor.preprocess(image)?;
        let scores = infer(&self.model, &tensor)?;

        let result = policy::decide(
            scores.as_slice(),
            &self.labels,
            &self.target_label,
            &self.secret,
        );

        let index = policy::argmax(scores.as_slice());
        let confidence = scores.probabilities().get(index).copied().unwrap_or(0.0);
        tracing::debug!(
            width,
            height,
            label = self.labels.get(index).unwrap_or_default(),
            confidence,
            revealed = result.is_flag(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Classified image"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{ResNetConfig, StateDict};
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;

    fn model_with_bias(bias: [f32; 3]) -> Arc<ClassifierModel> {
        let config = ResNetConfig::resnet18(3).with_base_width(2);
        let mut dict = StateDict::placeholder(&config, 11);
        dict.insert("fc.weight", vec![3, 16], vec![0.0; 48]).unwrap();
        dict.insert("fc.bias", vec![3], bias.to_vec()).unwrap();
        let bytes = dict.to_safetensors_bytes().unwrap();
        Arc::new(ClassifierModel::from_safetensors_bytes(&bytes, config).unwrap())
    }

    fn red_png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 50, Rgb([255, 0, 0])))
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_classify_label() {
        let classifier = Classifier::new(model_with_bias([1.0, 0.0, -1.0])).unwrap();
        let result = classifier.classify(&red_png()).unwrap();
        assert_eq!(result, PredictionResult::Label("cat".into()));
    }

    #[test]
    fn test_classify_reveals_secret_for_target() {
        let classifier = Classifier::new(model_with_bias([0.0, 0.0, 1.0])).unwrap();
        let result = classifier.classify(&red_png()).unwrap();
        assert_eq!(result, PredictionResult::Flag(Secret::default()));
    }

    #[test]
    fn test_classify_rejects_garbage_early() {
        let classifier = Classifier::new(model_with_bias([1.0, 0.0, 0.0])).unwrap();
        let err = classifier.classify(b"\x89PNG\r\n\x1a\nbroken").unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_label_table_must_match_model() {
        let labels = ClassLabelTable::new(["cat", "dog"]).unwrap();
        let err = Classifier::with_labels(
            model_with_bias([0.0; 3]),
            labels,
            "dog",
            Secret::new("x"),
        )
        .unwrap_err();
        assert!(matches!(err, FlagnetError::ModelLoad(_)));
    }

    #[test]
    fn test_preprocessor_limit_applies() {
        let classifier = Classifier::new(model_with_bias([0.0, 0.0, 1.0]))
            .unwrap()
            .with_preprocessor(Preprocessor::new().with_max_pixels(100));
        let err = classifier.classify(&red_png()).unwrap_err();
        assert!(matches!(err, FlagnetError::InvalidImage(_)));
    }
}
