//! Native ResNet-18 implementation.
//!
//! Inference-only port of torchvision's `resnet18`, loading weights directly
//! from a safetensors export of the PyTorch state dict.
//!
//! ## Architecture
//!
//! ```text
//! Input [3, H, W]
//!              ↓
//! conv1: Conv 7x7/2 (3 → w) → BN → ReLU → MaxPool 3x3/2
//!              ↓
//! layer1: 2x BasicBlock (w)
//! layer2: 2x BasicBlock (2w), first block stride 2 + 1x1 downsample
//! layer3: 2x BasicBlock (4w), first block stride 2 + 1x1 downsample
//! layer4: 2x BasicBlock (8w), first block stride 2 + 1x1 downsample
//!              ↓
//! Global average pool → [8w]
//!              ↓
//! fc: Linear(8w, num_classes) → logits
//! ```
//!
//! `w` is 64 for the standard network. Batch norm always uses the running
//! statistics, so the network behaves like `model.eval()` in PyTorch.

use std::collections::{HashMap, HashSet};

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis};
use safetensors::{Dtype, SafeTensors};

use crate::error::{FlagnetError, Result};

/// Architecture identifier
pub const ARCHITECTURE: &str = "resnet18";

/// PyTorch's default batch-norm epsilon
const BN_EPS: f32 = 1e-5;

/// Network shape parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResNetConfig {
    /// Output classes (size of the final linear layer)
    pub num_classes: usize,
    /// Stem width; stage `i` has `base_width << i` channels (64 for ResNet-18)
    pub base_width: usize,
    /// Basic blocks per stage
    pub blocks: [usize; 4],
    /// Input colour channels
    pub in_channels: usize,
}

impl ResNetConfig {
    /// Standard ResNet-18 with a custom classification head
    pub fn resnet18(num_classes: usize) -> Self {
        Self {
            num_classes,
            base_width: 64,
            blocks: [2, 2, 2, 2],
            in_channels: 3,
        }
    }

    /// Override the stem width (slim variants)
    pub fn with_base_width(mut self, base_width: usize) -> Self {
        self.base_width = base_width;
        self
    }

    /// Channel count of stage `stage` (0-based)
    pub fn stage_width(&self, stage: usize) -> usize {
        self.base_width << stage
    }

    /// Size of the pooled feature vector fed to `fc`
    pub fn feature_dim(&self) -> usize {
        self.stage_width(3)
    }

    fn block_plan(&self) -> Vec<BlockPlan> {
        let mut plan = Vec::new();
        let mut in_ch = self.base_width;
        for (stage, &count) in self.blocks.iter().enumerate() {
            let out_ch = self.stage_width(stage);
            for block in 0..count {
                let stride = if stage > 0 && block == 0 { 2 } else { 1 };
                plan.push(BlockPlan {
                    prefix: format!("layer{}.{block}", stage + 1),
                    in_ch,
                    out_ch,
                    stride,
                    downsample: stride != 1 || in_ch != out_ch,
                });
                in_ch = out_ch;
            }
        }
        plan
    }

    /// Every tensor the parameter file must contain, in state-dict order.
    pub fn layout(&self) -> Vec<TensorSpec> {
        let mut specs = Vec::new();
        let w = self.base_width;

        specs.push(TensorSpec::new("conv1.weight", vec![w, self.in_channels, 7, 7]));
        push_bn(&mut specs, "bn1", w);

        for block in self.block_plan() {
            let p = &block.prefix;
            specs.push(TensorSpec::new(
                format!("{p}.conv1.weight"),
                vec![block.out_ch, block.in_ch, 3, 3],
            ));
            push_bn(&mut specs, &format!("{p}.bn1"), block.out_ch);
            specs.push(TensorSpec::new(
                format!("{p}.conv2.weight"),
                vec![block.out_ch, block.out_ch, 3, 3],
            ));
            push_bn(&mut specs, &format!("{p}.bn2"), block.out_ch);
            if block.downsample {
                specs.push(TensorSpec::new(
                    format!("{p}.downsample.0.weight"),
                    vec![block.out_ch, block.in_ch, 1, 1],
                ));
                push_bn(&mut specs, &format!("{p}.downsample.1"), block.out_ch);
            }
        }

        specs.push(TensorSpec::new(
            "fc.weight",
            vec![self.num_classes, self.feature_dim()],
        ));
        specs.push(TensorSpec::new("fc.bias", vec![self.num_classes]));
        specs
    }
}

fn push_bn(specs: &mut Vec<TensorSpec>, prefix: &str, channels: usize) {
    for suffix in ["weight", "bias", "running_mean", "running_var"] {
        specs.push(TensorSpec::new(format!("{prefix}.{suffix}"), vec![channels]));
    }
}

/// Expected name and shape of one parameter tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    /// State-dict name, e.g. `layer2.0.downsample.0.weight`
    pub name: String,
    /// Expected shape
    pub shape: Vec<usize>,
}

impl TensorSpec {
    fn new(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Running statistics are buffers, not learned parameters
    pub fn is_buffer(&self) -> bool {
        self.name.ends_with(".running_mean") || self.name.ends_with(".running_var")
    }
}

#[derive(Debug, Clone)]
struct BlockPlan {
    prefix: String,
    in_ch: usize,
    out_ch: usize,
    stride: usize,
    downsample: bool,
}

/// 2D convolution without bias, computed as im2col + matrix product.
#[derive(Debug, Clone)]
struct Conv2d {
    weight: Array2<f32>, // [out_channels, in_channels * k * k]
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    fn new(
        weight: Vec<f32>,
        shape: &[usize],
        stride: usize,
        padding: usize,
        name: &str,
    ) -> Result<Self> {
        let (out_channels, in_channels, kernel) = (shape[0], shape[1], shape[2]);
        let weight = Array2::from_shape_vec((out_channels, in_channels * kernel * kernel), weight)
            .map_err(|e| FlagnetError::ModelLoad(format!("Shape mismatch for '{name}': {e}")))?;
        Ok(Self {
            weight,
            in_channels,
            out_channels,
            kernel,
            stride,
            padding,
        })
    }

    fn forward(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (c, h, w) = x.dim();
        let (k, s, p) = (self.kernel, self.stride, self.padding);
        if c != self.in_channels {
            return Err(FlagnetError::Inference(format!(
                "conv expects {} input channels, got {c}",
                self.in_channels
            )));
        }
        if h + 2 * p < k || w + 2 * p < k {
            return Err(FlagnetError::Inference(format!(
                "input {h}x{w} smaller than {k}x{k} kernel"
            )));
        }

        let ho = (h + 2 * p - k) / s + 1;
        let wo = (w + 2 * p - k) / s + 1;
        let plane = ho * wo;

        let input = x.as_standard_layout();
        let src = input
            .as_slice()
            .ok_or_else(|| FlagnetError::Inference("non-contiguous conv input".into()))?;

        // Padding positions stay zero
        let mut cols = vec![0.0f32; c * k * k * plane];
        for ci in 0..c {
            for ky in 0..k {
                for kx in 0..k {
                    let row = ((ci * k + ky) * k + kx) * plane;
                    for oy in 0..ho {
                        let Some(iy) = (oy * s + ky).checked_sub(p).filter(|&iy| iy < h) else {
                            continue;
                        };
                        let src_row = (ci * h + iy) * w;
                        let dst_row = row + oy * wo;
                        for ox in 0..wo {
                            if let Some(ix) = (ox * s + kx).checked_sub(p).filter(|&ix| ix < w) {
                                cols[dst_row + ox] = src[src_row + ix];
                            }
                        }
                    }
                }
            }
        }

        let cols = Array2::from_shape_vec((c * k * k, plane), cols)
            .map_err(|e| FlagnetError::Inference(e.to_string()))?;
        self.weight
            .dot(&cols)
            .into_shape_with_order((self.out_channels, ho, wo))
            .map_err(|e| FlagnetError::Inference(e.to_string()))
    }
}

/// Batch normalization with frozen statistics, folded into scale and shift.
#[derive(Debug, Clone)]
struct BatchNorm2d {
    scale: Array1<f32>,
    shift: Array1<f32>,
}

impl BatchNorm2d {
    fn new(weight: &[f32], bias: &[f32], mean: &[f32], var: &[f32]) -> Self {
        let scale: Array1<f32> = weight
            .iter()
            .zip(var)
            .map(|(&g, &v)| g / (v + BN_EPS).sqrt())
            .collect();
        let shift: Array1<f32> = bias
            .iter()
            .zip(mean)
            .zip(scale.iter())
            .map(|((&b, &m), &s)| b - m * s)
            .collect();
        Self { scale, shift }
    }

    fn apply(&self, x: &mut Array3<f32>) {
        for (c, mut channel) in x.axis_iter_mut(Axis(0)).enumerate() {
            let (scale, shift) = (self.scale[c], self.shift[c]);
            channel.mapv_inplace(|v| v * scale + shift);
        }
    }
}

/// Linear layer (dense)
#[derive(Debug, Clone)]
struct Linear {
    weight: Array2<f32>, // [out_features, in_features]
    bias: Array1<f32>,
}

impl Linear {
    fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        // y = Wx + b
        self.weight.dot(x) + &self.bias
    }
}

/// ReLU; NaN passes through like in PyTorch
fn relu(x: &mut Array3<f32>) {
    x.mapv_inplace(|v| if v < 0.0 { 0.0 } else { v });
}

/// 3x3 max pool, stride 2, padding 1 (padding never wins)
fn max_pool(x: &Array3<f32>) -> Array3<f32> {
    let (k, s, p) = (3usize, 2usize, 1usize);
    let (c, h, w) = x.dim();
    let ho = (h + 2 * p - k) / s + 1;
    let wo = (w + 2 * p - k) / s + 1;

    Array3::from_shape_fn((c, ho, wo), |(ci, oy, ox)| {
        let mut best = f32::NEG_INFINITY;
        for ky in 0..k {
            let Some(iy) = (oy * s + ky).checked_sub(p).filter(|&iy| iy < h) else {
                continue;
            };
            for kx in 0..k {
                if let Some(ix) = (ox * s + kx).checked_sub(p).filter(|&ix| ix < w) {
                    best = best.max(x[[ci, iy, ix]]);
                }
            }
        }
        best
    })
}

/// Global average pool over the spatial axes
fn avg_pool(x: &Array3<f32>) -> Array1<f32> {
    let (_, h, w) = x.dim();
    let area = (h * w) as f32;
    x.axis_iter(Axis(0)).map(|plane| plane.sum() / area).collect()
}

/// Two 3x3 convolutions with a residual connection
#[derive(Debug, Clone)]
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    downsample: Option<(Conv2d, BatchNorm2d)>,
}

impl BasicBlock {
    fn forward(&self, x: &Array3<f32>) -> Result<Array3<f32>> {
        let mut out = self.conv1.forward(x.view())?;
        self.bn1.apply(&mut out);
        relu(&mut out);

        let mut out = self.conv2.forward(out.view())?;
        self.bn2.apply(&mut out);

        match &self.downsample {
            Some((conv, bn)) => {
                let mut identity = conv.forward(x.view())?;
                bn.apply(&mut identity);
                out += &identity;
            },
            None => out += x,
        }

        relu(&mut out);
        Ok(out)
    }
}

/// Loaded parameter tensors, consumed while building layers
struct Params {
    tensors: HashMap<String, (Vec<usize>, Vec<f32>)>,
}

impl Params {
    fn take(&mut self, name: &str) -> Result<(Vec<usize>, Vec<f32>)> {
        self.tensors
            .remove(name)
            .ok_or_else(|| FlagnetError::ModelLoad(format!("Tensor '{name}' not found")))
    }

    fn conv(&mut self, name: &str, stride: usize, padding: usize) -> Result<Conv2d> {
        let (shape, values) = self.take(name)?;
        Conv2d::new(values, &shape, stride, padding, name)
    }

    fn batch_norm(&mut self, prefix: &str) -> Result<BatchNorm2d> {
        let (_, weight) = self.take(&format!("{prefix}.weight"))?;
        let (_, bias) = self.take(&format!("{prefix}.bias"))?;
        let (_, mean) = self.take(&format!("{prefix}.running_mean"))?;
        let (_, var) = self.take(&format!("{prefix}.running_var"))?;
        Ok(BatchNorm2d::new(&weight, &bias, &mean, &var))
    }
}

/// Complete ResNet-18 network
#[derive(Debug, Clone)]
pub struct ResNet {
    config: ResNetConfig,
    conv1: Conv2d,
    bn1: BatchNorm2d,
    blocks: Vec<BasicBlock>,
    fc: Linear,
}

impl ResNet {
    /// Build from a parsed safetensors container.
    ///
    /// Strict like PyTorch's `load_state_dict`: every tensor of
    /// [`ResNetConfig::layout`] must be present with the exact shape and `F32`
    /// dtype, and no unknown tensors may appear (`num_batches_tracked`
    /// counters are skipped).
    pub fn from_safetensors(config: ResNetConfig, tensors: &SafeTensors<'_>) -> Result<Self> {
        let layout = config.layout();

        let expected: HashSet<&str> = layout.iter().map(|s| s.name.as_str()).collect();
        let mut unexpected: Vec<&str> = tensors
            .names()
            .into_iter()
            .map(String::as_str)
            .filter(|n| !expected.contains(n) && !n.ends_with(".num_batches_tracked"))
            .collect();
        if !unexpected.is_empty() {
            unexpected.sort_unstable();
            return Err(FlagnetError::ModelLoad(format!(
                "Unexpected tensors in parameter file: {unexpected:?}"
            )));
        }

        let mut loaded = HashMap::with_capacity(layout.len());
        for spec in &layout {
            let values = load_tensor(tensors, spec)?;
            loaded.insert(spec.name.clone(), (spec.shape.clone(), values));
        }

        Self::from_params(config, Params { tensors: loaded })
    }

    fn from_params(config: ResNetConfig, mut params: Params) -> Result<Self> {
        let conv1 = params.conv("conv1.weight", 2, 3)?;
        let bn1 = params.batch_norm("bn1")?;

        let mut blocks = Vec::new();
        for plan in config.block_plan() {
            let p = &plan.prefix;
            let downsample = if plan.downsample {
                Some((
                    params.conv(&format!("{p}.downsample.0.weight"), plan.stride, 0)?,
                    params.batch_norm(&format!("{p}.downsample.1"))?,
                ))
            } else {
                None
            };
            blocks.push(BasicBlock {
                conv1: params.conv(&format!("{p}.conv1.weight"), plan.stride, 1)?,
                bn1: params.batch_norm(&format!("{p}.bn1"))?,
                conv2: params.conv(&format!("{p}.conv2.weight"), 1, 1)?,
                bn2: params.batch_norm(&format!("{p}.bn2"))?,
                downsample,
            });
        }

        let (fc_shape, fc_weight) = params.take("fc.weight")?;
        let (_, fc_bias) = params.take("fc.bias")?;
        let weight = Array2::from_shape_vec((fc_shape[0], fc_shape[1]), fc_weight)
            .map_err(|e| FlagnetError::ModelLoad(format!("Shape mismatch for 'fc.weight': {e}")))?;
        let fc = Linear {
            weight,
            bias: Array1::from_vec(fc_bias),
        };

        Ok(Self {
            config,
            conv1,
            bn1,
            blocks,
            fc,
        })
    }

    /// Get network configuration
    pub fn config(&self) -> &ResNetConfig {
        &self.config
    }

    /// Forward pass for one `[C, H, W]` image; returns raw logits.
    pub fn forward(&self, x: ArrayView3<'_, f32>) -> Result<Array1<f32>> {
        let mut h = self.conv1.forward(x)?;
        self.bn1.apply(&mut h);
        relu(&mut h);
        let mut h = max_pool(&h);

        for block in &self.blocks {
            h = block.forward(&h)?;
        }

        let features = avg_pool(&h);
        Ok(self.fc.forward(&features))
    }
}

// Helper functions for loading tensors

fn load_tensor(tensors: &SafeTensors<'_>, spec: &TensorSpec) -> Result<Vec<f32>> {
    let name = &spec.name;
    let view = tensors
        .tensor(name)
        .map_err(|e| FlagnetError::ModelLoad(format!("Tensor '{name}' not found: {e}")))?;

    if view.dtype() != Dtype::F32 {
        return Err(FlagnetError::ModelLoad(format!(
            "Tensor '{name}' has dtype {:?}, expected F32",
            view.dtype()
        )));
    }
    if view.shape() != spec.shape.as_slice() {
        return Err(FlagnetError::ModelLoad(format!(
            "Shape mismatch for '{name}': expected {:?}, got {:?}",
            spec.shape,
            view.shape()
        )));
    }

    Ok(view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resnet18_layout() {
        let layout = ResNetConfig::resnet18(3).layout();

        // stem (5) + 8 blocks x 10 + 3 downsamples x 5 + fc (2)
        assert_eq!(layout.len(), 5 + 80 + 15 + 2);

        let learned: usize = layout
            .iter()
            .filter(|s| !s.is_buffer())
            .map(TensorSpec::numel)
            .sum();
        // torchvision resnet18 has 11_689_512 parameters with a 1000-class head
        assert_eq!(learned, 11_689_512 - 513 * 1000 + 513 * 3);

        let fc = layout.iter().find(|s| s.name == "fc.weight").unwrap();
        assert_eq!(fc.shape, vec![3, 512]);

        let ds = layout
            .iter()
            .find(|s| s.name == "layer2.0.downsample.0.weight")
            .unwrap();
        assert_eq!(ds.shape, vec![128, 64, 1, 1]);
        assert!(!layout.iter().any(|s| s.name.starts_with("layer1.0.downsample")));
    }

    #[test]
    fn test_conv_identity_kernel() {
        // 3x3 kernel with a single 1 in the centre copies the input
        let mut weight = vec![0.0; 9];
        weight[4] = 1.0;
        let conv = Conv2d::new(weight, &[1, 1, 3, 3], 1, 1, "test").unwrap();

        let x = Array3::from_shape_fn((1, 4, 5), |(_, y, x)| (y * 5 + x) as f32);
        let y = conv.forward(x.view()).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn test_conv_stride_and_padding() {
        let conv = Conv2d::new(vec![1.0; 9], &[1, 1, 3, 3], 2, 1, "test").unwrap();
        let x = Array3::from_elem((1, 4, 4), 1.0);
        let y = conv.forward(x.view()).unwrap();

        assert_eq!(y.dim(), (1, 2, 2));
        // Top-left window overlaps the padding on two sides
        assert!((y[[0, 0, 0]] - 4.0).abs() < 1e-6);
        assert!((y[[0, 1, 1]] - 9.0).abs() < 1e-6);
    }

    #[test]
    fn test_conv_rejects_wrong_channels() {
        let conv = Conv2d::new(vec![1.0; 18], &[1, 2, 3, 3], 1, 1, "test").unwrap();
        let x = Array3::<f32>::zeros((3, 4, 4));
        assert!(matches!(
            conv.forward(x.view()),
            Err(FlagnetError::Inference(_))
        ));
    }

    #[test]
    fn test_batch_norm_folding() {
        let bn = BatchNorm2d::new(&[2.0], &[1.0], &[3.0], &[4.0 - BN_EPS]);
        let mut x = Array3::from_elem((1, 1, 1), 5.0);
        bn.apply(&mut x);
        // (5 - 3) / 2 * 2 + 1
        assert!((x[[0, 0, 0]] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_max_pool() {
        let x = Array3::from_shape_fn((1, 4, 4), |(_, y, x)| (y * 4 + x) as f32);
        let y = max_pool(&x);
        assert_eq!(y.dim(), (1, 2, 2));
        assert_eq!(y[[0, 0, 0]], 5.0);
        assert_eq!(y[[0, 1, 1]], 15.0);
    }

    #[test]
    fn test_avg_pool() {
        let x = Array3::from_shape_fn((2, 2, 2), |(c, y, x)| (c * 10 + y * 2 + x) as f32);
        let y = avg_pool(&x);
        assert!((y[0] - 1.5).abs() < 1e-6);
        assert!((y[1] - 11.5).abs() < 1e-6);
    }
}
