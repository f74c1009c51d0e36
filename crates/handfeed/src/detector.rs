//! Hand landmark detectors.
//!
//! [`HandDetector`] is the interface the frame pump drives. [`HandLandmarker`] implements it by
//! finding palms in the full frame and estimating 21 landmarks for each hand. In video mode, hands
//! found in one frame are followed into the next without running palm detection again.

use std::{fmt, mem};

use anyhow::{bail, ensure, Context};
use image::RgbImage;

use crate::{
    filter::{
        ema::{Ema, EmaState},
        Filter,
    },
    hand::{
        detection::{hand_region, PalmDetector, PalmFinder},
        landmark::{HandEstimate, LandmarkEstimator, LandmarkNetwork},
    },
    landmark::{DetectionResult, Landmark, LandmarkSet, NUM_LANDMARKS},
    nn::{Delegate, ModelAsset, NeuralNetwork},
    rect::RotatedRect,
    resolution::Resolution,
};

/// How a detector is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    /// Independent still images.
    Image,
    /// Timestamped frames of one video stream, smoothed over time.
    Video,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunningMode::Image => "IMAGE",
            RunningMode::Video => "VIDEO",
        })
    }
}

/// Finds hands in images and estimates their landmarks.
pub trait HandDetector {
    fn running_mode(&self) -> RunningMode;

    /// Switches the running mode, discarding any state kept for the previous mode.
    fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()>;

    /// Detects hands in a still image. Only valid in [`RunningMode::Image`].
    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<DetectionResult>;

    /// Detects hands in a video frame. Only valid in [`RunningMode::Video`].
    ///
    /// `timestamp_ms` must increase with every call.
    fn detect_for_video(
        &mut self,
        image: &RgbImage,
        timestamp_ms: u64,
    ) -> anyhow::Result<DetectionResult>;
}

impl<D: HandDetector + ?Sized> HandDetector for Box<D> {
    fn running_mode(&self) -> RunningMode {
        (**self).running_mode()
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()> {
        (**self).set_running_mode(mode)
    }

    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<DetectionResult> {
        (**self).detect(image)
    }

    fn detect_for_video(
        &mut self,
        image: &RgbImage,
        timestamp_ms: u64,
    ) -> anyhow::Result<DetectionResult> {
        (**self).detect_for_video(image, timestamp_ms)
    }
}

/// Configuration for a [`HandLandmarker`].
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    palm_model: ModelAsset,
    landmark_model: ModelAsset,
    delegate: Delegate,
    running_mode: RunningMode,
    num_hands: usize,
    min_detection_confidence: f32,
    min_presence: f32,
    smoothing: f32,
}

impl DetectorOptions {
    /// Smoothing factor used in video mode unless configured otherwise.
    pub const DEFAULT_SMOOTHING: f32 = 0.6;

    /// Creates options for the given palm detection and hand landmark models.
    ///
    /// Detectors start out in [`RunningMode::Image`] and track at most one hand.
    pub fn new(palm_model: ModelAsset, landmark_model: ModelAsset, delegate: Delegate) -> Self {
        Self {
            palm_model,
            landmark_model,
            delegate,
            running_mode: RunningMode::Image,
            num_hands: 1,
            min_detection_confidence: PalmDetector::DEFAULT_THRESHOLD,
            min_presence: 0.5,
            smoothing: Self::DEFAULT_SMOOTHING,
        }
    }

    pub fn running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    /// Sets the maximum number of hands reported per frame.
    pub fn num_hands(mut self, num_hands: usize) -> Self {
        self.num_hands = num_hands;
        self
    }

    /// Sets the minimum palm detection confidence (`0.0..=1.0`) for a new hand to be considered.
    pub fn min_detection_confidence(mut self, confidence: f32) -> Self {
        self.min_detection_confidence = confidence;
        self
    }

    /// Sets the minimum hand presence confidence (`0.0..=1.0`) for a hand to be reported.
    pub fn min_presence(mut self, min_presence: f32) -> Self {
        self.min_presence = min_presence;
        self
    }

    /// Sets the EMA weight of new landmark positions in video mode. `1.0` disables smoothing.
    pub fn smoothing(mut self, alpha: f32) -> Self {
        self.smoothing = alpha;
        self
    }

    pub fn delegate(&self) -> Delegate {
        self.delegate
    }

    pub fn max_hands(&self) -> usize {
        self.num_hands
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.min_detection_confidence),
            "minimum detection confidence must be in range 0.0..=1.0, got {}",
            self.min_detection_confidence
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_presence),
            "minimum presence must be in range 0.0..=1.0, got {}",
            self.min_presence
        );
        ensure!(
            self.smoothing > 0.0 && self.smoothing <= 1.0,
            "smoothing factor must be in range (0.0, 1.0], got {}",
            self.smoothing
        );
        Ok(())
    }
}

/// How much the landmarks' bounding box is grown on each side to get the next frame's region.
const REGION_PADDING: f32 = 0.3;

/// Palms whose hand region overlaps a tracked hand by at least this IoU are ignored.
const TRACK_IOU_THRESH: f32 = 0.3;

/// A hand followed from frame to frame.
struct Track {
    region: RotatedRect,
    ema_states: Vec<[EmaState; 3]>,
}

impl Track {
    fn new(region: RotatedRect) -> Self {
        Self {
            region,
            ema_states: vec![Default::default(); NUM_LANDMARKS],
        }
    }

    fn smooth(&mut self, ema: Ema, hand: LandmarkSet) -> anyhow::Result<LandmarkSet> {
        let smoothed = hand
            .iter()
            .zip(&mut self.ema_states)
            .map(|(lm, [sx, sy, sz])| {
                Landmark::new(
                    ema.filter(sx, lm.x),
                    ema.filter(sy, lm.y),
                    ema.filter(sz, lm.z),
                )
            })
            .collect::<Vec<_>>();
        LandmarkSet::new(smoothed, hand.handedness(), hand.presence())
    }
}

fn overlaps(a: &RotatedRect, b: &RotatedRect) -> bool {
    a.bounding_rect().iou(&b.bounding_rect()) >= TRACK_IOU_THRESH
}

/// Detects and tracks up to `num_hands` hands.
///
/// New hands are found with a palm detector ([`PalmFinder`]); each palm is grown into a region
/// covering the whole hand, in which a landmark network ([`LandmarkEstimator`]) estimates the
/// 21 landmarks. In video mode the landmarks of one frame determine the region to look at in the
/// next, and palm detection only runs while fewer than `num_hands` hands are tracked.
pub struct HandLandmarker<P = PalmDetector, L = LandmarkNetwork> {
    palms: P,
    landmarks: L,
    mode: RunningMode,
    num_hands: usize,
    min_presence: f32,
    ema: Ema,
    tracks: Vec<Track>,
    last_timestamp: Option<u64>,
}

impl HandLandmarker {
    /// Loads both models and creates a landmarker. This can take a while.
    pub fn from_options(options: &DetectorOptions) -> anyhow::Result<Self> {
        options.validate()?;

        let palm_nn = NeuralNetwork::load(&options.palm_model.load()?, options.delegate)
            .context("failed to load palm detection model")?;
        let landmark_nn = NeuralNetwork::load(&options.landmark_model.load()?, options.delegate)
            .context("failed to load hand landmark model")?;

        let mut palms = PalmDetector::new(palm_nn)?;
        palms.set_threshold(options.min_detection_confidence);
        let landmarks = LandmarkNetwork::new(landmark_nn)?;

        log::info!(
            "hand landmarker ready ({}, palm input {}, landmark input {}, {} mode)",
            options.delegate,
            palms.input_resolution(),
            landmarks.input_resolution(),
            options.running_mode
        );

        Self::with_parts(palms, landmarks, options)
    }
}

impl<P: PalmFinder, L: LandmarkEstimator> HandLandmarker<P, L> {
    /// Creates a landmarker from an existing palm finder and landmark estimator.
    ///
    /// The models named in `options` are not loaded.
    pub fn with_parts(palms: P, landmarks: L, options: &DetectorOptions) -> anyhow::Result<Self> {
        options.validate()?;
        Ok(Self {
            palms,
            landmarks,
            mode: options.running_mode,
            num_hands: options.num_hands,
            min_presence: options.min_presence,
            ema: Ema::new(options.smoothing),
            tracks: Vec::new(),
            last_timestamp: None,
        })
    }

    /// Estimates the hand in `region`, or returns `None` if it isn't there.
    fn estimate(
        &mut self,
        image: &RgbImage,
        region: &RotatedRect,
    ) -> anyhow::Result<Option<(HandEstimate, RotatedRect)>> {
        let estimate = self.landmarks.estimate(image, region)?;
        if estimate.presence() < self.min_presence {
            log::trace!("no hand in region (presence {:.2})", estimate.presence());
            return Ok(None);
        }
        Ok(estimate.next_region(REGION_PADDING).map(|next| (estimate, next)))
    }

    /// Follows the hands tracked in the previous frame, dropping lost and duplicate ones.
    fn follow_tracks(
        &mut self,
        image: &RgbImage,
        hands: &mut Vec<LandmarkSet>,
    ) -> anyhow::Result<()> {
        let res = Resolution::new(image.width(), image.height());
        for mut track in mem::take(&mut self.tracks) {
            let Some((estimate, next)) = self.estimate(image, &track.region)? else {
                log::debug!("lost track of a hand");
                continue;
            };
            if self.tracks.iter().any(|t| overlaps(&t.region, &next)) {
                log::trace!("dropping duplicate hand track");
                continue;
            }
            track.region = next;
            hands.push(track.smooth(self.ema, estimate.to_landmark_set(res)?)?);
            self.tracks.push(track);
        }
        Ok(())
    }

    /// Runs palm detection and starts tracking palms that aren't tracked yet.
    fn find_new_hands(
        &mut self,
        image: &RgbImage,
        hands: &mut Vec<LandmarkSet>,
    ) -> anyhow::Result<()> {
        if self.tracks.len() >= self.num_hands {
            return Ok(());
        }
        let res = Resolution::new(image.width(), image.height());
        let palms = self.palms.find_palms(image)?;
        log::trace!("{} palm(s) detected", palms.len());

        for palm in palms {
            if self.tracks.len() >= self.num_hands {
                break;
            }
            let region = hand_region(&palm);
            if self.tracks.iter().any(|t| overlaps(&t.region, &region)) {
                continue;
            }
            let Some((estimate, next)) = self.estimate(image, &region)? else {
                continue;
            };
            let mut track = Track::new(next);
            hands.push(track.smooth(self.ema, estimate.to_landmark_set(res)?)?);
            self.tracks.push(track);
        }
        Ok(())
    }
}

impl<P: PalmFinder, L: LandmarkEstimator> HandDetector for HandLandmarker<P, L> {
    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()> {
        if mode != self.mode {
            log::debug!("switching hand landmarker to {mode} mode");
            self.mode = mode;
            self.last_timestamp = None;
            self.tracks.clear();
        }
        Ok(())
    }

    fn detect(&mut self, image: &RgbImage) -> anyhow::Result<DetectionResult> {
        if self.mode != RunningMode::Image {
            bail!("`detect` called in {} mode", self.mode);
        }
        if self.num_hands == 0 || image.width() == 0 || image.height() == 0 {
            return Ok(DetectionResult::empty());
        }

        // Still images are unrelated, so nothing carries over between calls.
        self.tracks.clear();
        let mut hands = Vec::new();
        let result = self.find_new_hands(image, &mut hands);
        self.tracks.clear();
        result?;
        Ok(DetectionResult::from(hands))
    }

    fn detect_for_video(
        &mut self,
        image: &RgbImage,
        timestamp_ms: u64,
    ) -> anyhow::Result<DetectionResult> {
        if self.mode != RunningMode::Video {
            bail!("`detect_for_video` called in {} mode", self.mode);
        }
        if let Some(last) = self.last_timestamp {
            ensure!(
                timestamp_ms > last,
                "video timestamps must increase: got {timestamp_ms}ms after {last}ms"
            );
        }
        self.last_timestamp = Some(timestamp_ms);

        if self.num_hands == 0 || image.width() == 0 || image.height() == 0 {
            self.tracks.clear();
            return Ok(DetectionResult::empty());
        }

        let mut hands = Vec::new();
        let result = self
            .follow_tracks(image, &mut hands)
            .and_then(|()| self.find_new_hands(image, &mut hands));
        if let Err(e) = result {
            // Start over from palm detection on the next frame.
            self.tracks.clear();
            return Err(e);
        }
        Ok(DetectionResult::from(hands))
    }
}
