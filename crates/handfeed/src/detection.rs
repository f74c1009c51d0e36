//! Object detection results shared by single-shot detector networks.

pub mod nms;
pub mod ssd;

use nalgebra::{Point2, Vector2};

use crate::rect::{Rect, RotatedRect};

/// Maps raw network scores to `(0, 1)`.
#[inline]
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value in
/// `[0, 1]`, the object's rotation, and a possibly empty set of keypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    confidence: f32,
    angle: f32,
    rect: Rect,
    keypoints: Vec<Point2<f32>>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self::with_keypoints(confidence, rect, Vec::new())
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Point2<f32>>) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints,
        }
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the clockwise rotation of the detected object, in radians.
    #[inline]
    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    /// Returns the axis-aligned rectangle containing the detected object.
    #[inline]
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn set_bounding_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    /// Returns the bounding rectangle, rotated by [`Detection::angle`].
    pub fn rotated_rect(&self) -> RotatedRect {
        RotatedRect::new(self.rect, self.angle)
    }

    #[inline]
    pub fn keypoints(&self) -> &[Point2<f32>] {
        &self.keypoints
    }

    pub fn keypoints_mut(&mut self) -> &mut Vec<Point2<f32>> {
        &mut self.keypoints
    }

    /// Maps the detection from network input coordinates into the image region `view`.
    ///
    /// `scale` is the size of one network input pixel in `view`'s coordinate system.
    pub(crate) fn map_into(&mut self, view: &Rect, scale: f32) {
        let offset = Vector2::new(view.x(), view.y());
        let center = self.rect.center() * scale + offset;
        self.rect = Rect::from_center(
            center.x,
            center.y,
            self.rect.width() * scale,
            self.rect.height() * scale,
        );
        for kp in &mut self.keypoints {
            *kp = *kp * scale + offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_range() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn map_into_letterboxed_view() {
        // A 64x64 network input covering a 128x128 region whose top left is at (0, -20).
        let mut det = Detection::with_keypoints(
            0.9,
            Rect::from_center(32.0, 16.0, 8.0, 4.0),
            vec![Point2::new(0.0, 0.0), Point2::new(64.0, 64.0)],
        );
        det.map_into(&Rect::from_top_left(0.0, -20.0, 128.0, 128.0), 2.0);

        assert_eq!(det.bounding_rect(), Rect::from_center(64.0, 12.0, 16.0, 8.0));
        assert_eq!(det.keypoints(), &[Point2::new(0.0, -20.0), Point2::new(128.0, 108.0)]);
        assert_eq!(det.confidence(), 0.9);
    }
}
