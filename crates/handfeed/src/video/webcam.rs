//! V4L2 webcam access.
//!
//! Only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are supported.

use std::{
    cmp::Reverse,
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use anyhow::bail;
use image::{ImageFormat, RgbImage};
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, Pixelformat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use pawawwewism::{promise, Promise, Worker};

use super::{CameraConstraints, Frame, FrameSlot, VideoSource};
use crate::{
    resolution::Resolution,
    timer::{FpsCounter, Timer},
};

/// Environment variable that forces the webcam device to open when no name is configured.
pub const ENV_VAR_WEBCAM_NAME: &str = "HANDFEED_WEBCAM_NAME";

#[derive(Clone, Copy)]
struct FrameFormat {
    resolution: Resolution,
    frame_interval: Fract,
}

impl FrameFormat {
    fn fps(&self) -> f32 {
        (1.0 / self.frame_interval.as_f32()).round()
    }
}

/// The subset of [`CameraConstraints`] that take part in format negotiation.
#[derive(Debug, Clone, Copy, Default)]
struct FramePrefs {
    min: Option<Resolution>,
    max: Option<Resolution>,
    fps: Option<u32>,
}

impl FramePrefs {
    fn from_constraints(c: &CameraConstraints) -> Self {
        Self {
            min: c.min_resolution,
            max: c.max_resolution,
            fps: c.fps,
        }
    }

    /// Drops the least important constraint. Returns `false` if there was none left to drop.
    fn relax(&mut self) -> bool {
        self.fps.take().is_some() || self.max.take().is_some() || self.min.take().is_some()
    }
}

/// Picks the largest format satisfying `prefs`, breaking ties by frame rate.
fn pick_format(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    formats
        .iter()
        .filter(|fmt| {
            prefs.min.map_or(true, |min| fmt.resolution.covers(min))
                && prefs.max.map_or(true, |max| fmt.resolution.fits_within(max))
                && prefs.fps.map_or(true, |fps| fmt.fps() >= fps as f32)
        })
        .max_by_key(|fmt| (fmt.resolution.num_pixels(), Reverse(fmt.frame_interval)))
        .copied()
}

fn negotiate(formats: &[FrameFormat], mut prefs: FramePrefs) -> Option<FrameFormat> {
    loop {
        if let Some(fmt) = pick_format(formats, prefs) {
            return Some(fmt);
        }
        log::debug!("no webcam format satisfies {:?}", prefs);
        if !prefs.relax() {
            return None;
        }
        log::debug!("retrying with relaxed constraints {:?}", prefs);
    }
}

fn supported_formats(device: &Device) -> anyhow::Result<(Pixelformat, Vec<FrameFormat>)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        if format.pixelformat() == Pixelformat::JPEG || format.pixelformat() == Pixelformat::MJPG {
            pixel_format = Some(format.pixelformat());
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
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

    Ok((pixel_format, formats))
}

/// A webcam yielding a stream of RGB images.
pub struct Webcam {
    stream: ReadStream,
    resolution: Resolution,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first webcam that can satisfy `constraints`.
    ///
    /// This blocks while the device initializes, which can take hundreds of milliseconds. Fails
    /// if no device is present, access is denied, or no device supports a usable format.
    pub fn open(constraints: &CameraConstraints) -> anyhow::Result<Self> {
        if let Some(facing) = constraints.facing {
            log::debug!("V4L2 has no notion of camera facing, ignoring {:?}", facing);
        }
        let name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = &name_from_env {
            log::debug!("webcam override: `{ENV_VAR_WEBCAM_NAME}` is set to '{name}'");
        }
        let name = constraints.name.as_deref().or(name_from_env.as_deref());

        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_device(dev, name, constraints) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => log::debug!("{e}"),
                },
                Err(e) => log::warn!("{e}"),
            }
        }

        match name {
            Some(name) => bail!("no supported webcam named '{name}' found"),
            None => bail!("no supported webcam device found"),
        }
    }

    fn open_device(
        dev: Device,
        name: Option<&str>,
        constraints: &CameraConstraints,
    ) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if let Some(name) = name {
            if caps.card() != name {
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

        let (pixel_format, formats) = supported_formats(&dev)?;
        let Some(chosen) = negotiate(&formats, FramePrefs::from_constraints(constraints)) else {
            bail!("failed to negotiate a webcam format");
        };

        let capture = dev.video_capture(PixFormat::new(
            chosen.resolution.width(),
            chosen.resolution.height(),
            pixel_format,
        ))?;
        let format = capture.format();
        let resolution = Resolution::new(format.width(), format.height());
        let actual = capture.set_frame_interval(chosen.frame_interval)?;

        log::info!(
            "opened {} ({}), {} @ {:.1}Hz",
            caps.card(),
            path.display(),
            resolution,
            1.0 / actual.as_f32(),
        );

        Ok(Some(Self {
            stream: capture.into_stream(2)?,
            resolution,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Reads the next frame from the camera, blocking until one is available.
    pub fn read(&mut self) -> anyhow::Result<RgbImage> {
        let dequeue_guard = self.t_dequeue.start();
        let resolution = self.resolution;
        let t_decode = &self.t_decode;
        self.stream
            .dequeue(|buf| {
                drop(dequeue_guard);
                let decoded = t_decode
                    .time(|| image::load_from_memory_with_format(&buf, ImageFormat::Jpeg));
                let image = match decoded {
                    Ok(image) => image.into_rgb8(),
                    Err(e) => {
                        // Webcams occasionally deliver corrupted MJPG frames.
                        log::error!("webcam decode error: {e}");
                        RgbImage::new(resolution.width(), resolution.height())
                    }
                };
                Ok(image)
            })
            .map_err(Into::into)
    }

    /// Returns profiling timers for webcam access and decoding.
    pub fn timers(&self) -> [&Timer; 2] {
        [&self.t_dequeue, &self.t_decode]
    }
}

/// A webcam captured on a background thread.
///
/// The most recent frame is always available through [`VideoSource::current_frame`]; frame
/// times are seconds since the feed was opened. Dropping the feed stops the capture thread.
pub struct WebcamFeed {
    slot: FrameSlot,
    resolution: Resolution,
    stop: Arc<AtomicBool>,
    _worker: Worker<Promise<anyhow::Result<Resolution>>>,
}

impl WebcamFeed {
    /// Opens a webcam and starts capturing frames.
    ///
    /// The device is opened on the capture thread; this blocks until it is ready and returns the
    /// error if it could not be opened.
    pub fn open(constraints: &CameraConstraints) -> anyhow::Result<Self> {
        let slot = FrameSlot::new();
        let stop = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::builder().name("webcam").spawn({
            let writer = slot.clone();
            let stop = stop.clone();
            let constraints = constraints.clone();
            move |opened: Promise<anyhow::Result<Resolution>>| {
                let mut webcam = match Webcam::open(&constraints) {
                    Ok(webcam) => webcam,
                    Err(e) => return opened.fulfill(Err(e)),
                };
                opened.fulfill(Ok(webcam.resolution()));
                capture(&mut webcam, &writer, &stop);
            }
        })?;

        let (opened, resolution) = promise();
        worker.send(opened);
        let Ok(resolution) = resolution.block() else {
            bail!("webcam thread exited while opening the device");
        };

        Ok(Self {
            slot,
            resolution: resolution?,
            stop,
            _worker: worker,
        })
    }

    /// Returns the negotiated capture resolution.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }
}

fn capture(webcam: &mut Webcam, slot: &FrameSlot, stop: &AtomicBool) {
    let start = Instant::now();
    let mut fps = FpsCounter::new("webcam");
    while !stop.load(Ordering::Relaxed) {
        match webcam.read() {
            Ok(image) => slot.store(Frame::new(image, start.elapsed().as_secs_f64())),
            Err(e) => {
                log::error!("webcam capture stopped: {e:#}");
                return;
            }
        }
        fps.tick_with(&webcam.timers());
    }
}

impl Drop for WebcamFeed {
    fn drop(&mut self) {
        // The worker joins the capture thread when dropped, after this.
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl VideoSource for WebcamFeed {
    fn current_frame(&self) -> Option<Frame> {
        self.slot.current_frame()
    }

    fn resolution(&self) -> Option<Resolution> {
        Some(self.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(w: u32, h: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            resolution: Resolution::new(w, h),
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            fmt(640, 480, 30),
            fmt(640, 480, 60),
            fmt(1280, 720, 30),
            fmt(1920, 1080, 30),
            fmt(1920, 1080, 5),
        ]
    }

    #[test]
    fn unconstrained_picks_largest() {
        let chosen = negotiate(&formats(), FramePrefs::default()).unwrap();
        assert_eq!(chosen.resolution, Resolution::RES_1080P);
        assert_eq!(chosen.fps(), 30.0);
    }

    #[test]
    fn max_resolution_caps_choice() {
        let prefs = FramePrefs {
            max: Some(Resolution::RES_720P),
            ..Default::default()
        };
        let chosen = negotiate(&formats(), prefs).unwrap();
        assert_eq!(chosen.resolution, Resolution::RES_720P);
    }

    #[test]
    fn fps_preference_among_equal_sizes() {
        let prefs = FramePrefs {
            max: Some(Resolution::RES_VGA),
            fps: Some(60),
            ..Default::default()
        };
        let chosen = negotiate(&formats(), prefs).unwrap();
        assert_eq!(chosen.resolution, Resolution::RES_VGA);
        assert_eq!(chosen.fps(), 60.0);
    }

    #[test]
    fn relaxes_unsatisfiable_constraints() {
        // Nothing is both at least 1080p and at least 60 FPS; fps is dropped first.
        let prefs = FramePrefs {
            min: Some(Resolution::RES_1080P),
            fps: Some(60),
            ..Default::default()
        };
        let chosen = negotiate(&formats(), prefs).unwrap();
        assert_eq!(chosen.resolution, Resolution::RES_1080P);
    }

    #[test]
    fn no_formats() {
        assert!(negotiate(&[], FramePrefs::default()).is_none());
    }
}
