//! Using a tracked hand as a pointing device.
//!
//! The pointer aims along the index finger. How far ahead of the index finger knuckle it lands
//! is the finger's length relative to the thumb, scaled by a sensitivity factor, so the pointer
//! reach does not depend on how far the hand is from the camera.

use nalgebra::{Point2, Point3};

use crate::landmark::{LandmarkIdx, LandmarkSet};

/// A hand in mirrored, aspect-corrected screen space.
///
/// Points are mirrored horizontally (the way a selfie preview is shown) and the longer image axis
/// is stretched about the center, so that a square region of the camera image maps to a square
/// region of a square viewport.
#[derive(Debug, Clone)]
pub struct HandPointer {
    points: Vec<Point3<f32>>,
    sensitivity: f32,
}

impl HandPointer {
    /// Converts `hand` into screen space.
    ///
    /// `aspect` is the camera frame's `width / height`.
    pub fn new(hand: &LandmarkSet, aspect: f32, sensitivity: f32) -> Self {
        let points = hand
            .iter()
            .map(|lm| {
                let (mut x, mut y) = (lm.x - 0.5, lm.y - 0.5);
                if aspect < 1.0 {
                    y /= aspect;
                } else {
                    x *= aspect;
                }
                Point3::new(1.0 - (x + 0.5), y + 0.5, lm.z)
            })
            .collect();
        Self {
            points,
            sensitivity,
        }
    }

    /// Returns a landmark's screen-space position.
    #[inline]
    pub fn point(&self, idx: LandmarkIdx) -> Point3<f32> {
        self.points[idx as usize]
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    /// Length of the thumb from its MCP joint to its tip.
    pub fn thumb_length(&self) -> f32 {
        let mcp = self.point(LandmarkIdx::ThumbMcp);
        let ip = self.point(LandmarkIdx::ThumbIp);
        let tip = self.point(LandmarkIdx::ThumbTip);
        nalgebra::distance(&mcp, &ip) + nalgebra::distance(&ip, &tip)
    }

    pub fn index_finger_length(&self) -> f32 {
        nalgebra::distance(
            &self.point(LandmarkIdx::IndexFingerMcp),
            &self.point(LandmarkIdx::IndexFingerTip),
        )
    }

    /// Vector from the index finger knuckle to its tip.
    pub fn index_finger_vector(&self) -> nalgebra::Vector3<f32> {
        self.point(LandmarkIdx::IndexFingerTip) - self.point(LandmarkIdx::IndexFingerMcp)
    }

    pub fn thumb_tip(&self) -> Point3<f32> {
        self.point(LandmarkIdx::ThumbTip)
    }

    pub fn index_finger_tip(&self) -> Point3<f32> {
        self.point(LandmarkIdx::IndexFingerTip)
    }

    pub fn middle_finger_tip(&self) -> Point3<f32> {
        self.point(LandmarkIdx::MiddleFingerTip)
    }

    pub fn ring_finger_pip(&self) -> Point3<f32> {
        self.point(LandmarkIdx::RingFingerPip)
    }

    /// Computes the 2D point the hand is aiming at.
    ///
    /// Returns `None` when the thumb has zero length, which leaves the reach undefined.
    pub fn target(&self) -> Option<Point2<f32>> {
        let thumb = self.thumb_length();
        if thumb <= f32::EPSILON {
            return None;
        }
        let base = self.point(LandmarkIdx::IndexFingerMcp);
        let aim = base + self.index_finger_vector() / thumb * self.sensitivity;
        Some(aim.xy())
    }
}
