//! Hand landmark estimation on a region of interest.

use anyhow::ensure;
use image::RgbImage;
use nalgebra::Point2;

use crate::{
    landmark::{Handedness, LandmarkIdx, LandmarkSet, NUM_LANDMARKS},
    nn::{image_to_tensor, NeuralNetwork, Tensor},
    rect::RotatedRect,
    resolution::Resolution,
    timer::Timer,
};

use super::{image_input, upright_angle};

/// Outputs of the hand landmark network, in order.
const OUT_SCREEN_LANDMARKS: usize = 0;
const OUT_PRESENCE: usize = 1;
const OUT_HANDEDNESS: usize = 2;

/// Landmarks of one hand, in pixels of the image they were estimated on.
#[derive(Debug, Clone, PartialEq)]
pub struct HandEstimate {
    positions: Box<[[f32; 3]]>,
    presence: f32,
    handedness: Handedness,
    angle: f32,
}

impl HandEstimate {
    /// Creates an estimate from [`NUM_LANDMARKS`] image positions.
    ///
    /// `z` uses the same scale as `x`. `angle` is the clockwise rotation of the hand, with `0.0`
    /// meaning the fingers point up.
    pub fn new(
        positions: impl Into<Box<[[f32; 3]]>>,
        presence: f32,
        handedness: Handedness,
        angle: f32,
    ) -> anyhow::Result<Self> {
        let positions = positions.into();
        ensure!(
            positions.len() == NUM_LANDMARKS,
            "hand estimate must have {} landmarks, got {}",
            NUM_LANDMARKS,
            positions.len()
        );
        Ok(Self {
            positions,
            presence,
            handedness,
            angle,
        })
    }

    #[inline]
    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    #[inline]
    pub fn presence(&self) -> f32 {
        self.presence
    }

    #[inline]
    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Computes the region to look at in the next frame: the landmarks' bounding box, aligned
    /// with the hand and grown by `padding` on each side.
    pub fn next_region(&self, padding: f32) -> Option<RotatedRect> {
        let points = self.positions.iter().map(|&[x, y, _]| Point2::new(x, y));
        RotatedRect::bounding(self.angle, points).map(|rect| rect.grow_rel(padding))
    }

    /// Normalizes the positions to an image of `res`.
    pub fn to_landmark_set(&self, res: Resolution) -> anyhow::Result<LandmarkSet> {
        let (w, h) = (res.width() as f32, res.height() as f32);
        LandmarkSet::new(
            self.positions.iter().map(|&[x, y, z]| [x / w, y / h, z / w]),
            self.handedness,
            self.presence,
        )
    }
}

/// Estimates the landmarks of the hand inside a region of an image.
pub trait LandmarkEstimator: Send {
    /// Estimates the hand inside `region` of `image`.
    ///
    /// The region's rotation should make the fingers point up inside it.
    fn estimate(&mut self, image: &RgbImage, region: &RotatedRect) -> anyhow::Result<HandEstimate>;
}

/// A MediaPipe-style hand landmark network.
///
/// The network takes a `[1, 3, H, W]` RGB tensor in `[0, 1]` and returns 63 screen-space
/// coordinates, a presence flag and a handedness score.
pub struct LandmarkNetwork {
    nn: NeuralNetwork,
    input_res: Resolution,
    t_infer: Timer,
}

impl LandmarkNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        let input_res = image_input(&nn, "hand landmark")?;

        let outputs = nn.outputs();
        ensure!(
            outputs.len() > OUT_HANDEDNESS,
            "hand landmark network must have at least 3 outputs, this one has {}",
            outputs.len()
        );
        let elems = |i: usize| outputs[i].shape().iter().product::<usize>();
        ensure!(
            elems(OUT_SCREEN_LANDMARKS) == NUM_LANDMARKS * 3
                && elems(OUT_PRESENCE) == 1
                && elems(OUT_HANDEDNESS) == 1,
            "unexpected hand landmark network outputs: {:?}",
            outputs
        );

        Ok(Self {
            nn,
            input_res,
            t_infer: Timer::new("landmark infer"),
        })
    }

    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    pub fn timers(&self) -> [&Timer; 1] {
        [&self.t_infer]
    }
}

impl LandmarkEstimator for LandmarkNetwork {
    fn estimate(&mut self, image: &RgbImage, region: &RotatedRect) -> anyhow::Result<HandEstimate> {
        let aspect = self.input_res.aspect_ratio().unwrap_or(1.0);
        let view = region.grow_to_fit_aspect(aspect);
        let input = image_to_tensor(image, &view, self.input_res);
        let outputs = self.t_infer.time(|| self.nn.estimate(&input))?;
        let raw = extract(&outputs)?;
        to_image_space(raw, &view, self.input_res)
    }
}

/// Network output in input pixel coordinates.
#[derive(Debug)]
struct RawHand {
    positions: Vec<[f32; 3]>,
    presence: f32,
    handedness: Handedness,
}

fn extract(outputs: &[Tensor]) -> anyhow::Result<RawHand> {
    ensure!(
        outputs.len() > OUT_HANDEDNESS,
        "expected at least 3 network outputs, got {}",
        outputs.len()
    );
    let screen = outputs[OUT_SCREEN_LANDMARKS].as_slice();
    let presence = outputs[OUT_PRESENCE].as_slice();
    let handedness = outputs[OUT_HANDEDNESS].as_slice();
    ensure!(
        screen.len() == NUM_LANDMARKS * 3 && presence.len() == 1 && handedness.len() == 1,
        "expected {} landmark coordinates, got {}",
        NUM_LANDMARKS * 3,
        screen.len()
    );

    Ok(RawHand {
        positions: screen.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        presence: presence[0],
        handedness: if handedness[0] > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        },
    })
}

/// Maps network output from the input tensor back onto the image `view` was sampled from.
fn to_image_space(
    raw: RawHand,
    view: &RotatedRect,
    input_res: Resolution,
) -> anyhow::Result<HandEstimate> {
    let scale = view.rect().width() / input_res.width() as f32;
    let in_view = raw
        .positions
        .iter()
        .map(|&[x, y, z]| [x * scale, y * scale, z * scale])
        .collect::<Vec<_>>();

    let at = |idx: LandmarkIdx| {
        let [x, y, _] = in_view[idx as usize];
        Point2::new(x, y)
    };
    let angle = view.rotation_radians()
        + upright_angle(at(LandmarkIdx::Wrist), at(LandmarkIdx::MiddleFingerMcp));

    let positions = in_view
        .iter()
        .map(|&[x, y, z]| {
            let p = view.transform_out(Point2::new(x, y));
            [p.x, p.y, z]
        })
        .collect::<Vec<_>>();
    HandEstimate::new(positions, raw.presence, raw.handedness, angle)
}
