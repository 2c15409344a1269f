//! Image decoding and tensor preprocessing.
//!
//! Reproduces the training-time transform exactly:
//!
//! ```text
//! bytes ──decode──> RawImage ──RGB8──> resize 224x224 (Triangle)
//!       ──HWC→CHW──> /255 ──> (x - mean[c]) / std[c] ──> [1, 3, 224, 224]
//! ```
//!
//! ## Interpolation
//!
//! Resizing uses [`FilterType::Triangle`], a separable linear filter whose
//! support grows with the downscale factor. It is the same filter family as
//! PIL's antialiased bilinear resize, but not bit-identical to it: `image`
//! runs the vertical pass first and keeps an `f32` intermediate, while PIL
//! goes horizontal first and rounds to `u8` between passes. Our output is
//! fixed by this implementation, not by PIL's.
//! The filter works per channel, so converting to RGB before resizing gives
//! the same colour values as converting after; doing it first keeps 16-bit,
//! grayscale and alpha inputs on one path.
//!
//! Changing the filter or the constants moves every decision boundary of the
//! model, which is exactly what participants are attacking.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Limits};
use ndarray::{Array4, ArrayView4};

use crate::error::{FlagnetError, Result};

/// Model input height and width
pub const INPUT_SIZE: u32 = 224;

/// Per-channel normalization means (RGB)
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel normalization standard deviations (RGB)
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Largest accepted pixel count (width × height) of an upload.
///
/// Matches PIL's decompression-bomb threshold (twice `MAX_IMAGE_PIXELS`).
/// Individual sides are not capped, so extreme aspect ratios still decode.
pub const DEFAULT_MAX_PIXELS: u64 = 178_956_970;

/// Decoded upload in its source size and colour mode
pub type RawImage = DynamicImage;

/// Normalized `[1, 3, H, W]` model input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Array4<f32>,
}

impl InputTensor {
    /// Wrap an array; the shape is checked by the inference engine.
    pub fn from_array(data: Array4<f32>) -> Self {
        Self { data }
    }

    /// Tensor view
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Shape as `[batch, channels, height, width]`
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// Deterministic image-to-tensor transform.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    max_pixels: u64,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Preprocessor {
    /// Preprocessor for 224x224 model input
    pub fn new() -> Self {
        Self {
            size: INPUT_SIZE,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }

    /// Reject uploads with more than `max` pixels before decoding them
    pub fn with_max_pixels(mut self, max: u64) -> Self {
        self.max_pixels = max;
        self
    }

    /// Pixel-count limit applied by [`Preprocessor::decode`]
    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    /// Decode raw upload bytes.
    ///
    /// The format is sniffed from the content, never from a filename.
    pub fn decode(&self, bytes: &[u8]) -> Result<RawImage> {
        if bytes.is_empty() {
            return Err(FlagnetError::InvalidImage("empty upload".into()));
        }

        // Header only; nothing is allocated for pixel data yet
        let (width, height) = Self::reader(bytes)?.into_dimensions()?;
        let pixels = u64::from(width) * u64::from(height);
        if pixels > self.max_pixels {
            return Err(FlagnetError::InvalidImage(format!(
                "image has {pixels} pixels ({width}x{height}), limit is {}",
                self.max_pixels
            )));
        }

        let mut reader = Self::reader(bytes)?;
        reader.limits(Limits::default());
        Ok(reader.decode()?)
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| FlagnetError::InvalidImage(e.to_string()))?;

        if reader.format().is_none() {
            return Err(FlagnetError::InvalidImage("unrecognized image format".into()));
        }
        Ok(reader)
    }

    /// Transform a decoded image into a normalized input tensor.
    pub fn preprocess(&self, image: RawImage) -> Result<InputTensor> {
        let rgb = image.into_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(FlagnetError::InvalidImage(format!(
                "image has no pixels ({}x{})",
                rgb.width(),
                rgb.height()
            )));
        }

        let resized = imageops::resize(&rgb, self.size, self.size, FilterType::Triangle);

        let side = self.size as usize;
        let mut data = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                data[[0, c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
            }
        }

        Ok(InputTensor { data })
    }
}
