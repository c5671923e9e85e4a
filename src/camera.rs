//! V4L2 camera access.
//!
//! Only `VIDEO_CAPTURE` devices yielding uncompressed YUV frames are
//! supported. Compressed formats are not negotiated since the inference
//! pipeline consumes raw pixel data.

use std::{cmp::Reverse, env};

use anyhow::bail;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, PixelFormat as Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::{
    frame::{Frame, PixelFormat},
    resolution::Resolution,
    timer::Timer,
};

/// Indicates whether to prefer a higher resolution or frame rate.
///
/// By default, [`ParamPreference::Resolution`] is used, selecting the maximum resolution at the
/// desired frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParamPreference {
    /// Prefer increased resolution over higher frame rates.
    Resolution,
    /// Prefer higher frame rate over higher image resolution.
    Framerate,
}

impl Default for ParamPreference {
    #[inline]
    fn default() -> Self {
        Self::Resolution
    }
}

/// Which way the camera should face.
///
/// Most machines expose only a single webcam, which is treated as
/// front-facing. Devices whose card name marks them as front cameras are
/// preferred when [`Facing::Front`] is requested; everything else is still
/// accepted as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Facing {
    #[default]
    Front,
    Any,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<Resolution>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Device selection and format negotiation options.
#[derive(Default)]
pub struct CameraOptions {
    name: Option<String>,
    facing: Facing,
    frame: FramePrefs,
}

impl CameraOptions {
    /// Sets the name of the camera device to open.
    ///
    /// If no camera with the given name can be found, opening the camera will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the preferred camera facing.
    #[inline]
    pub fn facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    /// Sets the desired image resolution.
    ///
    /// A lower resolution might be selected if the camera cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(mut self, resolution: Resolution) -> Self {
        self.frame.resolution = Some(resolution);
        self
    }

    /// Sets the desired frame rate.
    ///
    /// A lower frame rate might be selected if the camera cannot deliver the desired frame rate.
    #[inline]
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to prefer a higher resolution or frame rate.
    ///
    /// When the camera cannot deliver the desired frame rate or resolution, this parameter controls
    /// which one will be maintained.
    #[inline]
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

/// Uncompressed formats the frame converter understands, in preference order.
const SUPPORTED_FORMATS: &[(Pixelformat, PixelFormat)] = &[
    (Pixelformat::YUYV, PixelFormat::Yuyv),
    (Pixelformat::from_fourcc(*b"NV12"), PixelFormat::Nv12),
    (Pixelformat::from_fourcc(*b"YU12"), PixelFormat::I420),
];

fn negotiate_format(
    device: &Device,
    mut prefs: FramePrefs,
) -> anyhow::Result<(PixFormat, PixelFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if let Some(supported) = SUPPORTED_FORMATS
            .iter()
            .copied()
            .find(|&(v4l2, _)| v4l2 == format.pixel_format())
        {
            pixel_format = Some(supported);
            break;
        }
    }

    let Some((pixel_format, frame_format)) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        resolution: Resolution::new(size.width(), size.height()),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    loop {
        if let Some(fmt) = negotiate_format_step(&formats, prefs) {
            return Ok((
                PixFormat::new(
                    fmt.resolution.width(),
                    fmt.resolution.height(),
                    pixel_format,
                ),
                frame_format,
                fmt.frame_interval,
            ));
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        match prefs.pref {
            ParamPreference::Resolution => {
                if prefs.resolution.take().is_none() && prefs.fps.take().is_none() {
                    break;
                }
            }
            ParamPreference::Framerate => {
                if prefs.fps.take().is_none() && prefs.resolution.take().is_none() {
                    break;
                }
            }
        }
        log::debug!("retrying with new prefs {:?}", prefs);
    }

    bail!("failed to negotiate a camera format")
}

fn negotiate_format_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let eligible = formats
        .iter()
        .filter(|fmt| {
            prefs.resolution.map_or(true, |res| {
                fmt.resolution.width() >= res.width() && fmt.resolution.height() >= res.height()
            }) && prefs.fps.map_or(true, |fps| {
                (1.0 / fmt.frame_interval.as_f32()).round() >= fps as f32
            })
        })
        .copied();
    let mut formats = eligible.collect::<Vec<_>>();
    match prefs.pref {
        ParamPreference::Resolution => {
            formats.sort_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
        }
        ParamPreference::Framerate => {
            formats.sort_by_key(|fmt| (Reverse(fmt.frame_interval), fmt.resolution.num_pixels()))
        }
    }
    formats.last().copied()
}

/// A camera yielding a stream of [`Frame`]s.
pub struct Camera {
    stream: ReadStream,
    width: u32,
    height: u32,
    format: PixelFormat,
    t_dequeue: Timer,
}

const ENV_VAR_CAMERA_NAME: &str = "HANDMARK_CAMERA_NAME";

impl Camera {
    /// Opens the first supported camera found.
    ///
    /// This function can block for a significant amount of time while the camera initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: CameraOptions) -> anyhow::Result<Self> {
        if let Ok(name) = env::var(ENV_VAR_CAMERA_NAME) {
            log::debug!(
                "camera override: `{}` is set to '{}'",
                ENV_VAR_CAMERA_NAME,
                name,
            );
        }

        let mut devices = Vec::new();
        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => devices.push(dev),
                Err(e) => {
                    log::warn!("{}", e);
                }
            }
        }
        if options.facing == Facing::Front {
            // Front cameras first; on single-camera machines this is a no-op.
            devices.sort_by_cached_key(|dev| {
                let is_front = dev
                    .capabilities()
                    .map(|caps| caps.card().to_ascii_lowercase().contains("front"))
                    .unwrap_or(false);
                Reverse(is_front)
            });
        }

        for dev in devices {
            match Self::open_impl(dev, &options) {
                Ok(Some(camera)) => return Ok(camera),
                Ok(None) => {}
                Err(e) => {
                    log::debug!("{}", e);
                }
            }
        }

        bail!("no supported camera device found")
    }

    fn open_impl(dev: Device, options: &CameraOptions) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        let cam_name_from_env = env::var(ENV_VAR_CAMERA_NAME).ok();
        if let Some(name) = &options.name.as_deref().or(cam_name_from_env.as_deref()) {
            if caps.card() != *name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, frame_format, fract) = negotiate_format(&dev, options.frame)?;

        let capture = dev.video_capture(pixfmt)?;

        let format = capture.format();
        let width = format.width();
        let height = format.height();

        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {}x{} {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            width,
            height,
            frame_format,
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream()?;

        Ok(Some(Self {
            stream,
            width,
            height,
            format: frame_format,
            t_dequeue: Timer::new("dequeue"),
        }))
    }

    /// Resolution the camera was configured to.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Pixel format of the frames this camera yields.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Reads the next valid frame from the camera.
    ///
    /// If no frame is available, this method will block until one is.
    /// Corrupted frames (wrong buffer size, usually from USB data corruption)
    /// are discarded and the next one is awaited, so a bad capture produces
    /// no output instead of a bogus one.
    pub fn read(&mut self) -> anyhow::Result<Frame> {
        let (width, height, format) = (self.width, self.height, self.format);
        loop {
            let dequeue_guard = self.t_dequeue.start();
            let frame = self.stream.dequeue(|buf| {
                drop(dequeue_guard);
                let mut data = buf.to_vec();
                if let Some(expected) = format.buffer_size(width, height) {
                    data.truncate(expected);
                }
                match Frame::new(data, width, height, format) {
                    Ok(frame) => Ok(Some(frame)),
                    Err(e) => {
                        // Occasional corrupted or short frames happen even with good hardware.
                        log::error!("discarding invalid camera frame: {}", e);
                        Ok(None)
                    }
                }
            })?;
            if let Some(frame) = frame {
                return Ok(frame);
            }
        }
    }

    /// Returns a borrowing iterator over the frames produced by this camera.
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        IterMut { camera: self }
    }

    /// Returns profiling timers for camera access.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue].into_iter()
    }
}

impl IntoIterator for Camera {
    type Item = anyhow::Result<Frame>;
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { camera: self }
    }
}

impl<'a> IntoIterator for &'a mut Camera {
    type Item = anyhow::Result<Frame>;
    type IntoIter = IterMut<'a>;

    fn into_iter(self) -> Self::IntoIter {
        IterMut { camera: self }
    }
}

/// An owned iterator over the frames captured by a [`Camera`].
pub struct IntoIter {
    camera: Camera,
}

/// A borrowing iterator over the frames captured by a [`Camera`].
pub struct IterMut<'a> {
    camera: &'a mut Camera,
}

impl Iterator for IntoIter {
    type Item = anyhow::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.camera.read())
    }
}

impl Iterator for IterMut<'_> {
    type Item = anyhow::Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.camera.read())
    }
}
