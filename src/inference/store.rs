//! Model store: one-time construction of the classifier network.

use std::path::PathBuf;

use safetensors::SafeTensors;
use serde::Serialize;

use super::resnet::{ResNet, ResNetConfig, TensorSpec, ARCHITECTURE};
use crate::challenge::ClassLabelTable;
use crate::error::{FlagnetError, Result};

/// Static description of a loaded model, safe to expose to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// Architecture identifier
    pub architecture: &'static str,
    /// Output classes
    pub num_classes: usize,
    /// Stem width
    pub base_width: usize,
    /// Learned parameters (running statistics excluded)
    pub parameter_count: usize,
    /// Always true: the native network has no training behaviour
    pub eval_mode: bool,
}

/// Immutable classifier model, shared read-only after load.
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    network: ResNet,
    info: ModelInfo,
}

impl ClassifierModel {
    /// Build from safetensors bytes.
    ///
    /// Fails with [`FlagnetError::ModelLoad`] if the bytes are not a valid
    /// container or do not match `config`.
    pub fn from_safetensors_bytes(bytes: &[u8], config: ResNetConfig) -> Result<Self> {
        let tensors = SafeTensors::deserialize(bytes)?;

        // Checked first: a head sized for a different label table is the
        // likeliest mistake and deserves a precise message
        if let Ok(fc) = tensors.tensor("fc.bias") {
            let classes = fc.shape().first().copied().unwrap_or(0);
            if classes != config.num_classes {
                return Err(FlagnetError::ModelLoad(format!(
                    "Parameter file has {classes} output classes, label table has {}",
                    config.num_classes
                )));
            }
        }

        let parameter_count = config
            .layout()
            .iter()
            .filter(|s| !s.is_buffer())
            .map(TensorSpec::numel)
            .sum();

        let network = ResNet::from_safetensors(config.clone(), &tensors)?;

        Ok(Self {
            network,
            info: ModelInfo {
                architecture: ARCHITECTURE,
                num_classes: config.num_classes,
                base_width: config.base_width,
                parameter_count,
                eval_mode: true,
            },
        })
    }

    /// Model description
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.info.num_classes
    }

    pub(crate) fn network(&self) -> &ResNet {
        &self.network
    }
}

/// Loads the classifier once at process start.
///
/// [`ModelStore::load`] consumes the store, so a store yields at most one
/// model. Callers wrap the result in an `Arc` and share it.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
    config: ResNetConfig,
}

impl ModelStore {
    /// Store for a ResNet-18 whose head matches `labels`
    pub fn new(path: impl Into<PathBuf>, labels: &ClassLabelTable) -> Self {
        Self {
            path: path.into(),
            config: ResNetConfig::resnet18(labels.len()),
        }
    }

    /// Override the network stem width
    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.config = self.config.with_base_width(base_width);
        self
    }

    /// Read the parameter file and build the model.
    pub fn load(self) -> Result<ClassifierModel> {
        let data = std::fs::read(&self.path).map_err(|e| {
            FlagnetError::ModelLoad(format!(
                "Failed to read model file {}: {e}",
                self.path.display()
            ))
        })?;

        let model = ClassifierModel::from_safetensors_bytes(&data, self.config)?;

        tracing::info!(
            path = %self.path.display(),
            architecture = model.info.architecture,
            classes = model.info.num_classes,
            parameters = model.info.parameter_count,
            "Model loaded"
        );

        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::weights::StateDict;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;

    fn small_config() -> ResNetConfig {
        ResNetConfig::resnet18(3).with_base_width(2)
    }

    #[test]
    fn test_load_placeholder_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        StateDict::placeholder(&small_config(), 0).write(&path).unwrap();

        let model = ModelStore::new(&path, &ClassLabelTable::default())
            .with_base_width(2)
            .load()
            .unwrap();

        let info = model.info();
        assert_eq!(info.architecture, "resnet18");
        assert_eq!(info.num_classes, 3);
        assert!(info.eval_mode);
        assert!(info.parameter_count > 0);
    }

    #[test]
    fn test_missing_file() {
        let err = ModelStore::new("/nonexistent/model.safetensors", &ClassLabelTable::default())
            .load()
            .unwrap_err();
        assert!(matches!(err, FlagnetError::ModelLoad(_)));
    }

    #[test]
    fn test_not_safetensors() {
        let err = ClassifierModel::from_safetensors_bytes(b"PK\x03\x04 pickle", small_config())
            .unwrap_err();
        assert!(matches!(err, FlagnetError::ModelLoad(_)));
    }

    #[test]
    fn test_class_count_mismatch() {
        let four_classes = ResNetConfig::resnet18(4).with_base_width(2);
        let bytes = StateDict::placeholder(&four_classes, 0)
            .to_safetensors_bytes()
            .unwrap();

        let err = ClassifierModel::from_safetensors_bytes(&bytes, small_config()).unwrap_err();
        assert!(err.to_string().contains("4 output classes"));
    }

    #[test]
    fn test_width_mismatch() {
        let bytes = StateDict::placeholder(&small_config(), 0)
            .to_safetensors_bytes()
            .unwrap();
        let wider = ResNetConfig::resnet18(3).with_base_width(4);

        let err = ClassifierModel::from_safetensors_bytes(&bytes, wider).unwrap_err();
        assert!(err.to_string().contains("Shape mismatch"));
    }

    #[test]
    fn test_missing_tensor() {
        let mut dict = StateDict::placeholder(&small_config(), 0);
        dict.remove("layer3.1.bn2.running_var").unwrap();
        let bytes = dict.to_safetensors_bytes().unwrap();

        let err = ClassifierModel::from_safetensors_bytes(&bytes, small_config()).unwrap_err();
        assert!(err.to_string().contains("layer3.1.bn2.running_var"));
    }

    #[test]
    fn test_unexpected_tensor() {
        let mut dict = StateDict::placeholder(&small_config(), 0);
        dict.insert("extra.weight", vec![1], vec![0.0]).unwrap();
        dict.insert("bn1.num_batches_tracked", vec![1], vec![0.0]).unwrap();
        let bytes = dict.to_safetensors_bytes().unwrap();

        let err = ClassifierModel::from_safetensors_bytes(&bytes, small_config()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("extra.weight"));
        assert!(!msg.contains("num_batches_tracked"));
    }

    #[test]
    fn test_unsupported_dtype() {
        let dict = StateDict::placeholder(&small_config(), 0);
        let raw: Vec<(String, Vec<usize>, Dtype, Vec<u8>)> = small_config()
            .layout()
            .iter()
            .map(|spec| {
                let (shape, values) = dict.get(&spec.name).unwrap();
                if spec.name == "conv1.weight" {
                    let bytes = values.iter().flat_map(|v| f64::from(*v).to_le_bytes()).collect();
                    (spec.name.clone(), shape.to_vec(), Dtype::F64, bytes)
                } else {
                    let bytes = values.iter().flat_map(|v| v.to_le_bytes()).collect();
                    (spec.name.clone(), shape.to_vec(), Dtype::F32, bytes)
                }
            })
            .collect();
        let views: Vec<(&str, TensorView<'_>)> = raw
            .iter()
            .map(|(name, shape, dtype, bytes)| {
                (name.as_str(), TensorView::new(*dtype, shape.clone(), bytes).unwrap())
            })
            .collect();
        let bytes = safetensors::serialize(views, &None).unwrap();

        let err = ClassifierModel::from_safetensors_bytes(&bytes, small_config()).unwrap_err();
        assert!(matches!(err, FlagnetError::ModelLoad(_)));
        assert!(err.to_string().contains("conv1.weight"));
    }
}
