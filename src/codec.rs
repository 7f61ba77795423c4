//! Image <-> tensor codec
//!
//! Converts interleaved RGBA frames into planar, normalized NCHW float tensors
//! and model output tensors back into displayable frames, blending with the
//! original by a [`StyleStrength`]. Both operations are pure; a single
//! [`TensorCodec`] can be shared freely across tasks.

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::frame::{RawFrame, ResizeFilter, RGBA_CHANNELS};

/// Color channels in model tensors (RGB, alpha dropped)
pub const TENSOR_CHANNELS: usize = 3;

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame has zero width or height")]
    EmptyFrame,
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Ordered NCHW tensor shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
    pub batch: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorShape {
    pub const fn new(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch,
            channels,
            height,
            width,
        }
    }

    /// Single RGB image of the given size
    pub const fn image(width: usize, height: usize) -> Self {
        Self::new(1, TENSOR_CHANNELS, height, width)
    }

    pub fn element_count(&self) -> usize {
        self.batch * self.channels * self.height * self.width
    }

    pub fn dims(&self) -> [usize; 4] {
        [self.batch, self.channels, self.height, self.width]
    }
}

impl std::fmt::Display for TensorShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.batch, self.channels, self.height, self.width
        )
    }
}

/// Affine mapping between 8-bit pixel values and model values:
/// `model = pixel * scale + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub scale: f32,
    pub offset: f32,
}

impl Normalization {
    /// `value / 255`, the default contract
    pub const UNIT: Self = Self {
        scale: 1.0 / 255.0,
        offset: 0.0,
    };

    /// Raw 0-255 values
    pub const PIXEL: Self = Self {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    pub fn normalize(&self, value: u8) -> f32 {
        value as f32 * self.scale + self.offset
    }

    pub fn denormalize(&self, value: f32) -> u8 {
        ((value - self.offset) / self.scale).round().clamp(0.0, 255.0) as u8
    }

    /// Inclusive range of values `normalize` can produce
    pub fn range(&self) -> (f32, f32) {
        let low = self.normalize(0);
        let high = self.normalize(255);
        (low.min(high), low.max(high))
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::UNIT
    }
}

/// Blend factor between the original (0.0) and fully stylized (1.0) output
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct StyleStrength(f32);

impl StyleStrength {
    pub const NONE: Self = Self(0.0);
    pub const FULL: Self = Self(1.0);

    /// Clamp into `[0, 1]`; NaN becomes 0
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self::NONE;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for StyleStrength {
    fn default() -> Self {
        Self(0.8)
    }
}

impl From<f32> for StyleStrength {
    fn from(value: f32) -> Self {
        Self::new(value)
    }
}

/// Planar NCHW model input
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl InputTensor {
    pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self, CodecError> {
        check_len(shape, data.len())?;
        Ok(Self { shape, data })
    }

    /// Zero-filled tensor, used for session warm-up
    pub fn zeros(shape: TensorShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.element_count()],
        }
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_parts(self) -> (TensorShape, Vec<f32>) {
        (self.shape, self.data)
    }
}

/// Engine-produced model output, NCHW
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self, CodecError> {
        check_len(shape, data.len())?;
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

fn check_len(shape: TensorShape, len: usize) -> Result<(), CodecError> {
    if shape.element_count() != len {
        return Err(CodecError::ShapeMismatch {
            expected: format!("{} elements for {}", shape.element_count(), shape),
            actual: format!("{} elements", len),
        });
    }
    Ok(())
}

/// Stateless frame/tensor converter
#[derive(Debug, Clone, Copy, Default)]
pub struct TensorCodec {
    filter: ResizeFilter,
}

impl TensorCodec {
    pub fn new(filter: ResizeFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> FilterType {
        self.filter.into()
    }

    /// Resize `frame` to exactly `target_width` x `target_height`, drop alpha,
    /// and lay the normalized channels out as planar R, G, B.
    pub fn preprocess(
        &self,
        frame: &RawFrame,
        target_width: u32,
        target_height: u32,
        normalization: Normalization,
    ) -> Result<InputTensor, CodecError> {
        if frame.is_empty() || target_width == 0 || target_height == 0 {
            return Err(CodecError::EmptyFrame);
        }

        let resized = frame.resized(target_width, target_height, self.filter());
        let plane = target_width as usize * target_height as usize;
        let mut data = vec![0.0f32; TENSOR_CHANNELS * plane];

        for (i, px) in resized.rgba().iter().enumerate() {
            data[i] = normalization.normalize(px[0]);
            data[plane + i] = normalization.normalize(px[1]);
            data[2 * plane + i] = normalization.normalize(px[2]);
        }

        InputTensor::new(
            TensorShape::image(target_width as usize, target_height as usize),
            data,
        )
    }

    /// Denormalize `tensor` into RGBA at the target size and blend it with
    /// `original` (resampled to the same size):
    /// `out = strength * stylized + (1 - strength) * original`.
    pub fn postprocess(
        &self,
        tensor: &OutputTensor,
        original: &RawFrame,
        target_width: u32,
        target_height: u32,
        strength: StyleStrength,
        normalization: Normalization,
    ) -> Result<RawFrame, CodecError> {
        if original.is_empty() || target_width == 0 || target_height == 0 {
            return Err(CodecError::EmptyFrame);
        }

        let expected = TensorShape::image(target_width as usize, target_height as usize);
        if tensor.shape() != expected {
            return Err(CodecError::ShapeMismatch {
                expected: expected.to_string(),
                actual: tensor.shape().to_string(),
            });
        }

        let original = original.resized(target_width, target_height, self.filter());
        let plane = target_width as usize * target_height as usize;
        let data = tensor.as_slice();
        let s = strength.value();
        let mut output = vec![0u8; plane * RGBA_CHANNELS];

        let blend = |stylized: u8, source: u8| -> u8 {
            (s * stylized as f32 + (1.0 - s) * source as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        };

        for (i, (out, src)) in output
            .chunks_exact_mut(RGBA_CHANNELS)
            .zip(original.rgba())
            .enumerate()
        {
            for channel in 0..TENSOR_CHANNELS {
                let stylized = normalization.denormalize(data[channel * plane + i]);
                out[channel] = blend(stylized, src[channel]);
            }
            out[3] = blend(u8::MAX, src[3]);
        }

        RawFrame::new(target_width, target_height, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_frame(width: u32, height: u32) -> RawFrame {
        let mut rng = rand::rng();
        let pixels = (0..width * height * 4).map(|_| rng.random::<u8>()).collect();
        RawFrame::new(width, height, pixels).unwrap()
    }

    fn random_output(width: usize, height: usize) -> OutputTensor {
        let mut rng = rand::rng();
        let shape = TensorShape::image(width, height);
        let data = (0..shape.element_count())
            .map(|_| rng.random_range(0.0f32..=1.0))
            .collect();
        OutputTensor::new(shape, data).unwrap()
    }

    #[test]
    fn test_strength_clamping() {
        assert_eq!(StyleStrength::new(-0.3).value(), 0.0);
        assert_eq!(StyleStrength::new(1.7).value(), 1.0);
        assert_eq!(StyleStrength::new(0.25).value(), 0.25);
        assert_eq!(StyleStrength::new(f32::NAN).value(), 0.0);
        assert_eq!(StyleStrength::default().value(), 0.8);
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let codec = TensorCodec::default();
        for &(w, h) in &[(224u32, 224u32), (64, 32), (1, 1)] {
            let tensor = codec
                .preprocess(&random_frame(97, 53), w, h, Normalization::UNIT)
                .unwrap();
            assert_eq!(tensor.len(), 3 * w as usize * h as usize);
            assert_eq!(tensor.shape(), TensorShape::image(w as usize, h as usize));
            assert!(tensor.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn test_preprocess_custom_normalization_range() {
        let codec = TensorCodec::default();
        let norm = Normalization::new(2.0 / 255.0, -1.0);
        let (low, high) = norm.range();
        let tensor = codec.preprocess(&random_frame(16, 16), 8, 8, norm).unwrap();
        assert!(tensor
            .as_slice()
            .iter()
            .all(|v| *v >= low - 1e-6 && *v <= high + 1e-6));
    }

    #[test]
    fn test_preprocess_planar_layout() {
        let codec = TensorCodec::default();
        let frame = RawFrame::filled(2, 2, [255, 0, 51, 7]);
        let tensor = codec.preprocess(&frame, 2, 2, Normalization::UNIT).unwrap();
        let data = tensor.as_slice();
        assert!(data[0..4].iter().all(|v| *v == 1.0));
        assert!(data[4..8].iter().all(|v| *v == 0.0));
        assert!(data[8..12].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_empty_frame() {
        let codec = TensorCodec::default();
        let frame = RawFrame::new(0, 10, Vec::new()).unwrap();
        assert!(matches!(
            codec.preprocess(&frame, 224, 224, Normalization::UNIT),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn test_postprocess_full_strength_round_trip() {
        let codec = TensorCodec::default();
        let tensor = random_output(32, 24);
        let original = random_frame(50, 40);

        let frame = codec
            .postprocess(&tensor, &original, 32, 24, StyleStrength::FULL, Normalization::UNIT)
            .unwrap();
        let again = codec.preprocess(&frame, 32, 24, Normalization::UNIT).unwrap();

        for (a, b) in tensor.as_slice().iter().zip(again.as_slice()) {
            assert!((a - b).abs() <= 0.5 / 255.0 + 1e-6, "{} vs {}", a, b);
        }
        assert!(frame.rgba().iter().all(|px| px[3] == 255));
    }

    #[test]
    fn test_postprocess_zero_strength_returns_original() {
        let codec = TensorCodec::default();
        let tensor = random_output(16, 16);
        let original = random_frame(16, 16);

        let frame = codec
            .postprocess(&tensor, &original, 16, 16, StyleStrength::NONE, Normalization::UNIT)
            .unwrap();
        assert_eq!(frame, original);
    }

    #[test]
    fn test_postprocess_resamples_original() {
        let codec = TensorCodec::default();
        let tensor = random_output(8, 8);
        let original = RawFrame::filled(40, 30, [100, 100, 100, 255]);

        let frame = codec
            .postprocess(&tensor, &original, 8, 8, StyleStrength::NONE, Normalization::UNIT)
            .unwrap();
        assert_eq!(frame, RawFrame::filled(8, 8, [100, 100, 100, 255]));
    }

    #[test]
    fn test_postprocess_blends_half() {
        let codec = TensorCodec::default();
        let shape = TensorShape::image(1, 1);
        let tensor = OutputTensor::new(shape, vec![200.0, 200.0, 200.0]).unwrap();
        let original = RawFrame::filled(1, 1, [100, 100, 100, 255]);

        let frame = codec
            .postprocess(&tensor, &original, 1, 1, StyleStrength::new(0.5), Normalization::PIXEL)
            .unwrap();
        assert_eq!(frame.pixel(0, 0), Some([150, 150, 150, 255]));
    }

    #[test]
    fn test_postprocess_shape_mismatch() {
        let codec = TensorCodec::default();
        let tensor = random_output(16, 16);
        let original = random_frame(16, 16);

        let err = codec
            .postprocess(&tensor, &original, 32, 16, StyleStrength::FULL, Normalization::UNIT)
            .unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_normalization_inverse() {
        let norm = Normalization::new(2.0 / 255.0, -1.0);
        for v in 0..=255u8 {
            assert_eq!(norm.denormalize(norm.normalize(v)), v);
        }
        assert_eq!(Normalization::UNIT.denormalize(2.0), 255);
        assert_eq!(Normalization::UNIT.denormalize(-1.0), 0);
    }

    #[test]
    fn test_tensor_length_checked() {
        let shape = TensorShape::image(4, 4);
        assert!(InputTensor::new(shape, vec![0.0; 47]).is_err());
        assert_eq!(InputTensor::zeros(shape).len(), 48);
    }
}
