//! Raw pixel frames
//!
//! A [`RawFrame`] is the interleaved 8-bit RGBA buffer the display layer draws
//! from. Frames come from decoded uploads or captured camera frames and are
//! handed to the tensor codec.

use image::imageops::FilterType;
use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// Bytes per interleaved RGBA pixel
pub const RGBA_CHANNELS: usize = 4;

/// Owned interleaved RGBA8 frame
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RawFrame {
    /// Wrap an RGBA buffer.
    ///
    /// The buffer length must be exactly `width * height * 4`. Zero-sized
    /// frames are representable; the codec rejects them.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, CodecError> {
        let expected = width as usize * height as usize * RGBA_CHANNELS;
        if pixels.len() != expected {
            return Err(CodecError::ShapeMismatch {
                expected: format!("{} bytes for {}x{} RGBA", expected, width, height),
                actual: format!("{} bytes", pixels.len()),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Frame filled with a single color
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * RGBA_CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decode an encoded image (PNG, JPEG, ...) into RGBA8
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_image(decoded.to_rgba8()))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixels viewed as `[r, g, b, a]` quads
    pub fn rgba(&self) -> &[[u8; 4]] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Pixel at (x, y), if in bounds
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.rgba()
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Resample to exactly `width` x `height`, ignoring aspect ratio.
    ///
    /// Returns a clone when the size already matches.
    pub fn resized(&self, width: u32, height: u32, filter: FilterType) -> Self {
        if self.dimensions() == (width, height) {
            return self.clone();
        }
        match ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(self.width, self.height, &self.pixels[..]) {
            Some(view) => Self::from_image(image::imageops::resize(&view, width, height, filter)),
            // Unreachable while the length invariant holds; degrade to black.
            None => Self::filled(width, height, [0, 0, 0, 255]),
        }
    }

    /// Cheap nearest-neighbour downscale for feeding live frames to inference
    pub fn downscaled(&self, target_width: u32, target_height: u32) -> Self {
        if self.dimensions() == (target_width, target_height) || self.is_empty() {
            return self.clone();
        }

        let mut output = vec![0u8; target_width as usize * target_height as usize * RGBA_CHANNELS];
        let x_ratio = self.width as f32 / target_width as f32;
        let y_ratio = self.height as f32 / target_height as f32;
        let source = self.rgba();
        let dest: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut output);

        for y in 0..target_height {
            let src_y = ((y as f32 * y_ratio) as u32).min(self.height - 1);
            for x in 0..target_width {
                let src_x = ((x as f32 * x_ratio) as u32).min(self.width - 1);
                let src_idx = (src_y * self.width + src_x) as usize;
                dest[(y * target_width + x) as usize] = source[src_idx];
            }
        }

        Self {
            width: target_width,
            height: target_height,
            pixels: output,
        }
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Resampling filter used for every resize in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResizeFilter {
    Nearest,
    /// Bilinear; good balance of quality and speed for downscaling
    #[default]
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Nearest => FilterType::Nearest,
            ResizeFilter::Triangle => FilterType::Triangle,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = RawFrame::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, CodecError::ShapeMismatch { .. }));
        assert!(RawFrame::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn test_pixel_lookup() {
        let mut pixels = vec![0u8; 2 * 2 * 4];
        pixels[12..16].copy_from_slice(&[1, 2, 3, 4]);
        let frame = RawFrame::new(2, 2, pixels).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn test_resized_keeps_exact_size() {
        let frame = RawFrame::filled(512, 384, [10, 20, 30, 255]);
        let resized = frame.resized(224, 224, FilterType::Triangle);
        assert_eq!(resized.dimensions(), (224, 224));
        assert_eq!(resized.pixels().len(), 224 * 224 * 4);
        // Uniform input stays uniform under any filter
        assert_eq!(resized.pixel(100, 100), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_downscale_nearest() {
        let mut frame = RawFrame::filled(4, 4, [0, 0, 0, 255]);
        frame.pixels[0..4].copy_from_slice(&[255, 0, 0, 255]);
        let small = frame.downscaled(2, 2);
        assert_eq!(small.dimensions(), (2, 2));
        assert_eq!(small.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(small.pixel(1, 1), Some([0, 0, 0, 255]));
    }

    #[test]
    fn test_decode_png() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([9, 8, 7, 255]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        image.write_to(&mut encoded, image::ImageFormat::Png).unwrap();

        let frame = RawFrame::decode(encoded.get_ref()).unwrap();
        assert_eq!(frame.dimensions(), (3, 2));
        assert_eq!(frame.pixel(2, 1), Some([9, 8, 7, 255]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = RawFrame::decode(b"not an image").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
