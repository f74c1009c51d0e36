//! Test doubles for the detector and video source.

use std::{cell::RefCell, collections::VecDeque};

use anyhow::bail;
use image::RgbImage;
use pawawwewism::{promise, Promise};

use crate::{
    detector::{HandDetector, RunningMode},
    handle::DetectorHandle,
    landmark::{DetectionResult, Handedness, LandmarkSet, NUM_LANDMARKS},
    video::{Frame, VideoSource},
};

/// A detector that reports one hand per call, with every landmark at `(n, n, n) / 100` for the
/// `n`th call (1-based).
pub struct MockDetector {
    mode: RunningMode,
    timestamps: Vec<u64>,
    fail_on: Vec<usize>,
    empty: bool,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self {
            mode: RunningMode::Image,
            timestamps: Vec::new(),
            fail_on: Vec::new(),
            empty: false,
        }
    }
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th call (1-based) return an error.
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on.push(n);
        self
    }

    /// Makes every call return no hands.
    pub fn finding_nothing(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.timestamps.len()
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }
}

/// Starts constructing a [`MockDetector`] that only finishes once the returned [`Promise`] is
/// fulfilled.
pub fn gated_detector() -> (DetectorHandle<MockDetector>, Promise<()>) {
    let (release, gate) = promise::<()>();
    let handle = DetectorHandle::spawn("gated", move || {
        gate.block().ok();
        Ok(MockDetector::new())
    });
    (handle, release)
}

pub fn hand_for_call(n: usize) -> LandmarkSet {
    let v = n as f32 / 100.0;
    LandmarkSet::new(vec![[v, v, v]; NUM_LANDMARKS], Handedness::Right, 1.0).unwrap()
}

impl HandDetector for MockDetector {
    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<DetectionResult> {
        bail!("mock only supports video mode")
    }

    fn detect_for_video(
        &mut self,
        _image: &RgbImage,
        timestamp_ms: u64,
    ) -> anyhow::Result<DetectionResult> {
        assert_eq!(self.mode, RunningMode::Video);
        self.timestamps.push(timestamp_ms);
        let n = self.timestamps.len();
        if self.fail_on.contains(&n) {
            bail!("mock failure on call {n}");
        }
        if self.empty {
            return Ok(DetectionResult::empty());
        }
        Ok(DetectionResult::from(vec![hand_for_call(n)]))
    }
}

/// A video source that yields a scripted sequence of playback times, advancing by one entry every
/// time it is sampled. `None` entries mean "no frame decoded yet".
pub struct ScriptedVideo {
    times: RefCell<VecDeque<Option<f64>>>,
    last: RefCell<Option<f64>>,
}

impl ScriptedVideo {
    pub fn new<I: IntoIterator<Item = Option<f64>>>(times: I) -> Self {
        Self {
            times: RefCell::new(times.into_iter().collect()),
            last: RefCell::new(None),
        }
    }

    pub fn from_times(times: &[f64]) -> Self {
        Self::new(times.iter().copied().map(Some))
    }
}

impl VideoSource for ScriptedVideo {
    fn current_frame(&self) -> Option<Frame> {
        if let Some(next) = self.times.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        let time = (*self.last.borrow())?;
        Some(Frame::new(RgbImage::new(4, 3), time))
    }
}
