//! Video sources feeding the frame pump.

pub mod webcam;

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use image::RgbImage;

use crate::resolution::Resolution;

/// A decoded video frame and its position in the stream.
#[derive(Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    time: f64,
}

impl Frame {
    /// Creates a frame decoded at playback position `time` (in seconds).
    pub fn new(image: impl Into<Arc<RgbImage>>, time: f64) -> Self {
        Self {
            image: image.into(),
            time,
        }
    }

    #[inline]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Playback position of this frame, in seconds since the stream started.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("resolution", &self.resolution())
            .field("time", &self.time)
            .finish()
    }
}

/// A live video stream that can be sampled at any time.
///
/// Sources behave like a playing video element: they always expose the most recently decoded
/// frame, and sampling does not consume it.
pub trait VideoSource {
    /// Returns the most recently decoded frame, or `None` if no frame was decoded yet.
    fn current_frame(&self) -> Option<Frame>;

    /// Returns the playback position of the most recently decoded frame.
    fn current_time(&self) -> Option<f64> {
        self.current_frame().map(|frame| frame.time())
    }

    /// Returns the resolution of the most recently decoded frame.
    fn resolution(&self) -> Option<Resolution> {
        self.current_frame().map(|frame| frame.resolution())
    }
}

impl<V: VideoSource + ?Sized> VideoSource for Box<V> {
    fn current_frame(&self) -> Option<Frame> {
        (**self).current_frame()
    }

    fn current_time(&self) -> Option<f64> {
        (**self).current_time()
    }

    fn resolution(&self) -> Option<Resolution> {
        (**self).resolution()
    }
}

/// A shared slot holding the latest frame of a stream.
///
/// Writers replace the frame wholesale; readers get a cheap clone.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: Frame) {
        *self.lock() = Some(frame);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VideoSource for FrameSlot {
    fn current_frame(&self) -> Option<Frame> {
        self.lock().clone()
    }
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Facing the user (a selfie camera).
    User,
    /// Facing away from the user.
    Environment,
}

/// Constraints used when opening a camera.
///
/// Unset fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct CameraConstraints {
    pub(crate) name: Option<String>,
    pub(crate) min_resolution: Option<Resolution>,
    pub(crate) max_resolution: Option<Resolution>,
    pub(crate) fps: Option<u32>,
    pub(crate) facing: Option<FacingMode>,
}

impl CameraConstraints {
    /// Only open the camera device with this name.
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Requests a resolution of at least `res`.
    pub fn min_resolution(mut self, res: Resolution) -> Self {
        self.min_resolution = Some(res);
        self
    }

    /// Requests a resolution of at most `res`.
    pub fn max_resolution(mut self, res: Resolution) -> Self {
        self.max_resolution = Some(res);
        self
    }

    /// Requests a frame rate of at least `fps`.
    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn facing(mut self, facing: FacingMode) -> Self {
        self.facing = Some(facing);
        self
    }

    pub fn facing_mode(&self) -> Option<FacingMode> {
        self.facing
    }
}
