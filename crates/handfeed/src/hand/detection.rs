//! Palm detection.

use anyhow::{bail, ensure};
use image::RgbImage;
use nalgebra::Point2;

use crate::{
    detection::{
        nms::NonMaxSuppression,
        sigmoid,
        ssd::{Anchor, Anchors, LayerInfo},
        Detection,
    },
    nn::{image_to_tensor, NeuralNetwork, Tensor},
    rect::{Rect, RotatedRect},
    resolution::Resolution,
    timer::Timer,
};

use super::{image_input, upright_angle};

/// Keypoints the palm detection network reports for each palm, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist,
    IndexFingerMcp,
    MiddleFingerMcp,
    RingFingerMcp,
    PinkyMcp,
    ThumbCmc,
    ThumbMcp,
}

const NUM_KEYPOINTS: usize = 7;

/// Box center, box size, and the 7 keypoints.
const BOX_PARAMS: usize = 4 + 2 * NUM_KEYPOINTS;

const ANCHOR_LAYERS: &[LayerInfo] = &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// How much a palm's rectangle is grown on each side to cover the whole hand.
const PALM_TO_HAND: f32 = 1.5;

/// Computes the rotated region that should contain the whole hand belonging to `palm`.
pub fn hand_region(palm: &Detection) -> RotatedRect {
    palm.rotated_rect().grow_rel(PALM_TO_HAND)
}

/// Finds palms in a full image.
pub trait PalmFinder: Send {
    /// Returns the palms found in `image`, most confident first.
    ///
    /// Coordinates are in pixels of `image`.
    fn find_palms(&mut self, image: &RgbImage) -> anyhow::Result<Vec<Detection>>;
}

/// A single-shot palm detector.
///
/// The network takes a square `[1, 3, H, W]` RGB tensor and returns, for each of its 2016 anchors,
/// a box with 7 keypoints and a raw confidence score. The full frame is letterboxed into the
/// network input.
pub struct PalmDetector {
    nn: NeuralNetwork,
    input_res: Resolution,
    anchors: Anchors,
    thresh: f32,
    nms: NonMaxSuppression,
    t_infer: Timer,
    t_nms: Timer,
}

impl PalmDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        let input_res = image_input(&nn, "palm detection")?;
        let anchors = Anchors::calculate(ANCHOR_LAYERS);

        let outputs = nn.outputs();
        ensure!(
            outputs.len() >= 2,
            "palm detection network must have at least 2 outputs, this one has {}",
            outputs.len()
        );
        ensure!(
            outputs[0].shape() == [1, anchors.len(), BOX_PARAMS]
                && outputs[1].shape() == [1, anchors.len(), 1],
            "unexpected palm detection network outputs: {:?}",
            outputs
        );

        Ok(Self {
            nn,
            input_res,
            anchors,
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
            t_infer: Timer::new("palm infer"),
            t_nms: Timer::new("palm nms"),
        })
    }

    /// Sets the minimum confidence (`0.0..=1.0`) of reported palms.
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    pub fn timers(&self) -> [&Timer; 2] {
        [&self.t_infer, &self.t_nms]
    }
}

impl PalmFinder for PalmDetector {
    fn find_palms(&mut self, image: &RgbImage) -> anyhow::Result<Vec<Detection>> {
        let aspect = self.input_res.aspect_ratio().unwrap_or(1.0);
        let view = Rect::from_top_left(0.0, 0.0, image.width() as f32, image.height() as f32)
            .grow_to_fit_aspect(aspect);
        let input = image_to_tensor(image, &view.into(), self.input_res);

        let outputs = self.t_infer.time(|| self.nn.estimate(&input))?;
        let detections = extract(&outputs, &self.anchors, self.input_res, self.thresh)?;
        let mut palms = self.t_nms.time(|| self.nms.process(detections));

        let scale = view.width() / self.input_res.width() as f32;
        for palm in &mut palms {
            palm.map_into(&view, scale);
        }
        Ok(palms)
    }
}

/// Decodes all palms above `thresh`, in network input coordinates.
fn extract(
    outputs: &[Tensor],
    anchors: &Anchors,
    input_res: Resolution,
    thresh: f32,
) -> anyhow::Result<Vec<Detection>> {
    let [boxes, confidences, ..] = outputs else {
        bail!(
            "expected at least 2 palm detection outputs, got {}",
            outputs.len()
        );
    };
    let (boxes, confidences) = (boxes.as_slice(), confidences.as_slice());
    ensure!(
        boxes.len() == anchors.len() * BOX_PARAMS && confidences.len() == anchors.len(),
        "palm detection outputs don't match the {} anchors",
        anchors.len()
    );

    let detections = boxes
        .chunks_exact(BOX_PARAMS)
        .zip(confidences)
        .enumerate()
        .filter_map(|(i, (params, &raw))| {
            let confidence = sigmoid(raw);
            (confidence >= thresh).then(|| decode(&anchors[i], input_res, params, confidence))
        })
        .collect();
    Ok(detections)
}

fn decode(anchor: &Anchor, input_res: Resolution, params: &[f32], confidence: f32) -> Detection {
    let ax = anchor.x_center() * input_res.width() as f32;
    let ay = anchor.y_center() * input_res.height() as f32;
    let rect = Rect::from_center(params[0] + ax, params[1] + ay, params[2], params[3]);
    let keypoints = params[4..]
        .chunks_exact(2)
        .map(|p| Point2::new(p[0] + ax, p[1] + ay))
        .collect::<Vec<_>>();

    let angle = upright_angle(
        keypoints[Keypoint::Wrist as usize],
        keypoints[Keypoint::MiddleFingerMcp as usize],
    );
    let mut det = Detection::with_keypoints(confidence, rect, keypoints);
    det.set_angle(angle);
    det
}
