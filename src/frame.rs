//! Raw camera frames and pixel format conversion.

use std::fmt;

use crate::resolution::Resolution;

/// Pixel layout of a captured frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Packed 24-bit RGB, 3 bytes per pixel.
    Rgb,
    /// Packed YUV 4:2:2, 2 bytes per pixel (`Y0 U Y1 V`).
    Yuyv,
    /// Planar Y followed by interleaved UV, 12 bits per pixel.
    Nv12,
    /// Fully planar YUV 4:2:0 (Y, then U, then V), 12 bits per pixel.
    I420,
    /// Motion-JPEG compressed data. Not decodable by [`Frame::to_rgb`].
    Mjpeg,
}

impl PixelFormat {
    /// Returns the required buffer size in bytes for a `width x height` frame,
    /// or `None` when the format has no fixed size (compressed formats).
    pub(crate) fn buffer_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            Self::Rgb => Some(pixels * 3),
            Self::Yuyv => Some(pixels * 2),
            Self::Nv12 | Self::I420 => Some(pixels * 3 / 2),
            Self::Mjpeg => None,
        }
    }

    /// Whether chroma is subsampled horizontally and/or vertically, requiring
    /// even frame dimensions.
    fn is_subsampled(&self) -> bool {
        matches!(self, Self::Yuyv | Self::Nv12 | Self::I420)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb => "RGB",
            Self::Yuyv => "YUYV",
            Self::Nv12 => "NV12",
            Self::I420 => "I420",
            Self::Mjpeg => "MJPG",
        };
        f.write_str(name)
    }
}

/// Error produced when constructing or converting a [`Frame`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("cannot convert {0} frame data to RGB")]
    UnsupportedFormat(PixelFormat),
    #[error("{format} frames require even dimensions, got {width}x{height}")]
    OddDimensions {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
    #[error("{format} frame of {width}x{height} requires {expected} bytes, buffer holds {got}")]
    BufferSize {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("frame has 0 width or height")]
    EmptyFrame,
}

/// A single captured camera frame.
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Frame {
    /// Creates a frame from raw buffer contents.
    ///
    /// The buffer length is validated against the format's expected size, so
    /// downstream conversion code can index without bounds worries.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame);
        }
        if format.is_subsampled() && (width % 2 != 0 || height % 2 != 0) {
            return Err(FrameError::OddDimensions { format, width, height });
        }
        if let Some(expected) = format.buffer_size(width, height) {
            if data.len() != expected {
                return Err(FrameError::BufferSize {
                    format,
                    width,
                    height,
                    expected,
                    got: data.len(),
                });
            }
        }
        Ok(Self { data, width, height, format })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Converts the frame to a packed RGB image.
    ///
    /// RGB frames are copied through unchanged. YUV frames are converted with
    /// full-range BT.601 coefficients. Compressed formats are rejected with
    /// [`FrameError::UnsupportedFormat`].
    pub fn to_rgb(&self) -> Result<image::RgbImage, FrameError> {
        let (w, h) = (self.width, self.height);
        match self.format {
            PixelFormat::Rgb => Ok(image::RgbImage::from_raw(w, h, self.data.clone())
                .expect("validated buffer size")),
            PixelFormat::Yuyv => Ok(self.yuyv_to_rgb()),
            PixelFormat::Nv12 => Ok(self.nv12_to_rgb()),
            PixelFormat::I420 => Ok(self.i420_to_rgb()),
            PixelFormat::Mjpeg => Err(FrameError::UnsupportedFormat(self.format)),
        }
    }

    fn yuyv_to_rgb(&self) -> image::RgbImage {
        let w = self.width as usize;
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let pair = (y * w + x) & !1;
            let base = pair * 2;
            let luma = self.data[(y * w + x) * 2];
            let u = self.data[base + 1];
            let v = self.data[base + 3];
            image::Rgb(yuv_to_rgb(luma, u, v))
        })
    }

    fn nv12_to_rgb(&self) -> image::RgbImage {
        let w = self.width as usize;
        let luma_plane = w * self.height as usize;
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let luma = self.data[y * w + x];
            let uv = luma_plane + (y / 2) * w + (x & !1);
            image::Rgb(yuv_to_rgb(luma, self.data[uv], self.data[uv + 1]))
        })
    }

    fn i420_to_rgb(&self) -> image::RgbImage {
        let w = self.width as usize;
        let h = self.height as usize;
        let luma_plane = w * h;
        let chroma_plane = luma_plane / 4;
        let chroma_w = w / 2;
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let luma = self.data[y * w + x];
            let c = (y / 2) * chroma_w + x / 2;
            let u = self.data[luma_plane + c];
            let v = self.data[luma_plane + chroma_plane + c];
            image::Rgb(yuv_to_rgb(luma, u, v))
        })
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Full-range BT.601 YUV to RGB conversion for a single pixel.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344136 * u - 0.714136 * v;
    let b = y + 1.772 * u;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(val: f32) -> u8 {
    val.round().clamp(0.0, 255.0) as u8
}
