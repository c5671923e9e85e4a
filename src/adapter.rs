//! Converts camera frames into model input tensors.
//!
//! The adapter is derived from the model's input shape, so it follows whatever
//! resolution and memory layout the loaded network expects instead of
//! hardcoding either.

use crate::{
    frame::{Frame, FrameError},
    nn::{InferenceModel, Tensor},
};

/// Maps `u8` color channel values to the `f32` range a network was trained on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorMapper {
    start: f32,
    end: f32,
}

impl ColorMapper {
    /// Maps colors linearly into `range` (0 maps to the start, 255 to the end).
    pub fn linear(range: std::ops::RangeInclusive<f32>) -> Self {
        Self {
            start: *range.start(),
            end: *range.end(),
        }
    }

    #[inline]
    fn map_channel(&self, value: u8) -> f32 {
        self.start + (self.end - self.start) * (value as f32 / 255.0)
    }

    pub fn map(&self, rgb: [u8; 3]) -> [f32; 3] {
        rgb.map(|ch| self.map_channel(ch))
    }
}

impl Default for ColorMapper {
    fn default() -> Self {
        Self::linear(0.0..=1.0)
    }
}

/// Memory layout of a rank-4 image input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    /// `[1, channels, height, width]`.
    Nchw,
    /// `[1, height, width, channels]`.
    Nhwc,
}

/// Error returned when an input shape cannot be interpreted as an RGB image.
#[derive(Debug, thiserror::Error)]
#[error("cannot derive an image layout from model input shape {shape:?}")]
pub struct LayoutError {
    shape: Vec<usize>,
}

/// Resizes and normalizes frames into a model's input tensor.
#[derive(Debug, Clone)]
pub struct FrameTensorizer {
    layout: InputLayout,
    width: usize,
    height: usize,
    mapper: ColorMapper,
}

impl FrameTensorizer {
    /// Derives a tensorizer from a model's input shape.
    ///
    /// Supports rank-4 shapes with a batch of 1 and 3 color channels, in
    /// either channels-first or channels-last order.
    pub fn from_shape(shape: &[usize]) -> Result<Self, LayoutError> {
        let (layout, width, height) = match *shape {
            [1, 3, h, w] => (InputLayout::Nchw, w, h),
            [1, h, w, 3] => (InputLayout::Nhwc, w, h),
            _ => {
                return Err(LayoutError {
                    shape: shape.to_vec(),
                })
            }
        };
        Ok(Self {
            layout,
            width,
            height,
            mapper: ColorMapper::default(),
        })
    }

    /// Derives a tensorizer from a loaded model.
    pub fn for_model(model: &dyn InferenceModel) -> Result<Self, LayoutError> {
        Self::from_shape(model.input_shape())
    }

    /// Overrides the color normalization range.
    pub fn with_color_mapper(mut self, mapper: ColorMapper) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts `frame` to RGB, resizes it to the model resolution, and
    /// normalizes it into a tensor of the model's input layout.
    ///
    /// Resizing uses nearest-neighbor sampling at pixel centers. The frame's
    /// aspect ratio is not preserved.
    pub fn tensorize(&self, frame: &Frame) -> Result<Tensor, FrameError> {
        let rgb = frame.to_rgb()?;
        let sample = |x: usize, y: usize| {
            let src_x = ((x as f32 + 0.5) / self.width as f32 * rgb.width() as f32) as u32;
            let src_y = ((y as f32 + 0.5) / self.height as f32 * rgb.height() as f32) as u32;
            let px = rgb.get_pixel(src_x.min(rgb.width() - 1), src_y.min(rgb.height() - 1));
            self.mapper.map(px.0)
        };
        let tensor = match self.layout {
            InputLayout::Nchw => Tensor::from_fn([1, 3, self.height, self.width], |[_, c, y, x]| {
                sample(x, y)[c]
            }),
            InputLayout::Nhwc => Tensor::from_fn([1, self.height, self.width, 3], |[_, y, x, c]| {
                sample(x, y)[c]
            }),
        };
        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::frame::PixelFormat;

    use super::*;

    fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame::new(data, width, height, PixelFormat::Rgb).unwrap()
    }

    #[test]
    fn layout_detection() {
        let t = FrameTensorizer::from_shape(&[1, 3, 224, 224]).unwrap();
        assert_eq!(t.layout(), InputLayout::Nchw);
        assert_eq!((t.width(), t.height()), (224, 224));

        let t = FrameTensorizer::from_shape(&[1, 192, 256, 3]).unwrap();
        assert_eq!(t.layout(), InputLayout::Nhwc);
        assert_eq!((t.width(), t.height()), (256, 192));

        assert!(FrameTensorizer::from_shape(&[1, 224, 224]).is_err());
        assert!(FrameTensorizer::from_shape(&[2, 3, 224, 224]).is_err());
    }

    #[test]
    fn normalizes_to_unit_range() {
        let frame = solid_rgb(8, 8, [0, 128, 255]);
        let t = FrameTensorizer::from_shape(&[1, 4, 4, 3]).unwrap();
        let tensor = t.tensorize(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 4, 4, 3]);
        let px = tensor.index([0, 0, 0]).as_slice();
        assert_relative_eq!(px[0], 0.0);
        assert_relative_eq!(px[1], 128.0 / 255.0);
        assert_relative_eq!(px[2], 1.0);
    }

    #[test]
    fn custom_color_range() {
        let frame = solid_rgb(4, 4, [255, 0, 255]);
        let t = FrameTensorizer::from_shape(&[1, 2, 2, 3])
            .unwrap()
            .with_color_mapper(ColorMapper::linear(-1.0..=1.0));
        let tensor = t.tensorize(&frame).unwrap();
        let px = tensor.index([0, 1, 1]).as_slice();
        assert_relative_eq!(px[0], 1.0);
        assert_relative_eq!(px[1], -1.0);
        assert_relative_eq!(px[2], 1.0);
    }

    #[test]
    fn nchw_places_channels_first() {
        let frame = solid_rgb(4, 4, [255, 0, 0]);
        let t = FrameTensorizer::from_shape(&[1, 3, 2, 2]).unwrap();
        let tensor = t.tensorize(&frame).unwrap();
        for y in 0..2 {
            for x in 0..2 {
                assert_relative_eq!(tensor.index([0, 0, y, x]).as_singular(), 1.0);
                assert_relative_eq!(tensor.index([0, 1, y, x]).as_singular(), 0.0);
                assert_relative_eq!(tensor.index([0, 2, y, x]).as_singular(), 0.0);
            }
        }
    }

    #[test]
    fn downscales_larger_frames() {
        // Left half red, right half blue.
        let (w, h) = (16u32, 8u32);
        let mut data = Vec::new();
        for _ in 0..h {
            for x in 0..w {
                if x < w / 2 {
                    data.extend([255, 0, 0]);
                } else {
                    data.extend([0, 0, 255]);
                }
            }
        }
        let frame = Frame::new(data, w, h, PixelFormat::Rgb).unwrap();
        let t = FrameTensorizer::from_shape(&[1, 4, 4, 3]).unwrap();
        let tensor = t.tensorize(&frame).unwrap();
        assert_relative_eq!(tensor.index([0, 0, 0, 0]).as_singular(), 1.0);
        assert_relative_eq!(tensor.index([0, 0, 3, 2]).as_singular(), 1.0);
    }
}
