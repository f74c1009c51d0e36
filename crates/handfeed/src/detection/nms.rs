//! Non-Maximum Suppression and Averaging.
//!
//! Single-shot detectors report every object several times, from neighboring anchors. Non-Maximum
//! Suppression keeps the most confident detection of each overlapping group. Non-Maximum
//! Averaging instead replaces the group by its confidence-weighted average, which jitters less
//! from frame to frame and is used by default.

use nalgebra::{Point2, Vector2};

use super::Detection;
use crate::rect::Rect;

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    mode: SuppressionMode,
    avg_buf: Vec<Detection>,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a suppressor using [`SuppressionMode::Average`] and the default IoU threshold.
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            mode: SuppressionMode::Average,
            avg_buf: Vec::new(),
        }
    }

    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Filters `detections`, returning one detection per group of overlapping ones, most
    /// confident first.
    pub fn process(&mut self, mut detections: Vec<Detection>) -> Vec<Detection> {
        let mut out = Vec::new();

        // Ascending, so that the most confident detection is popped first.
        detections.sort_unstable_by(|a, b| a.confidence().total_cmp(&b.confidence()));

        while let Some(seed) = detections.pop() {
            let seed_rect = seed.bounding_rect();
            match self.mode {
                SuppressionMode::Remove => {
                    detections
                        .retain(|other| seed_rect.iou(&other.bounding_rect()) < self.iou_thresh);
                    out.push(seed);
                }
                SuppressionMode::Average => {
                    self.avg_buf.clear();
                    let mut i = 0;
                    while i < detections.len() {
                        if seed_rect.iou(&detections[i].bounding_rect()) >= self.iou_thresh {
                            self.avg_buf.push(detections.remove(i));
                        } else {
                            i += 1;
                        }
                    }
                    self.avg_buf.push(seed);
                    out.push(average(&self.avg_buf));
                }
            }
        }

        self.avg_buf.clear();
        out
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of `group`, whose last element is the seed.
///
/// The result keeps the seed's confidence.
fn average(group: &[Detection]) -> Detection {
    let Some(seed) = group.last() else {
        return Detection::new(0.0, Rect::from_center(0.0, 0.0, 0.0, 0.0));
    };

    let mut center = Vector2::zeros();
    let mut size = Vector2::zeros();
    let mut angle = 0.0;
    let mut keypoints = vec![Vector2::zeros(); seed.keypoints().len()];
    let mut divisor = 0.0;
    for det in group {
        assert_eq!(
            det.keypoints().len(),
            keypoints.len(),
            "keypoint count must be constant"
        );

        let weight = det.confidence();
        divisor += weight;
        let rect = det.bounding_rect();
        center += rect.center().coords * weight;
        size += Vector2::new(rect.width(), rect.height()) * weight;
        angle += det.angle() * weight;
        for (acc, kp) in keypoints.iter_mut().zip(det.keypoints()) {
            *acc += kp.coords * weight;
        }
    }

    if divisor <= 0.0 {
        return seed.clone();
    }
    center /= divisor;
    size /= divisor;
    let mut avg = Detection::with_keypoints(
        seed.confidence(),
        Rect::from_center(center.x, center.y, size.x, size.y),
        keypoints
            .into_iter()
            .map(|kp| Point2::from(kp / divisor))
            .collect(),
    );
    avg.set_angle(angle / divisor);
    avg
}

/// Describes how [`NonMaxSuppression`] deals with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionMode {
    /// Keep only the most confident detection.
    Remove,
    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_suppresses_non_maximum() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let rect = Rect::from_center(0.0, 0.0, 1.0, 1.0);
        let a = Detection::new(0.6, rect);
        let b = Detection::new(0.55, rect.scale(1.5));
        let detections = nms.process(vec![b, a]);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].confidence(), 0.6);
        assert_eq!(detections[0].bounding_rect(), rect);
    }

    #[test]
    fn nms_ignores_nonoverlapping() {
        let mut nms = NonMaxSuppression::new();
        nms.set_mode(SuppressionMode::Remove);

        let a = Detection::new(0.7, Rect::from_center(0.0, 0.0, 1.0, 1.0));
        let b = Detection::new(0.9, Rect::from_center(5.0, 0.0, 1.0, 1.0));
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].confidence(), 0.9);
    }

    #[test]
    fn nma_averages_detections() {
        let mut nms = NonMaxSuppression::new();
        nms.set_iou_thresh(0.0);

        let rect = Rect::from_center(-1.0, 3.0, 1.0, 1.0);
        let mut a = Detection::with_keypoints(1.0, rect, vec![Point2::new(0.0, 0.0)]);
        a.set_angle(0.3);
        let b = Detection::with_keypoints(0.5, rect.scale(4.0), vec![Point2::new(3.0, 6.0)]);
        let detections = nms.process(vec![a, b]);
        assert_eq!(detections.len(), 1);

        let d = &detections[0];
        assert_eq!(d.confidence(), 1.0);
        assert_eq!(d.bounding_rect(), Rect::from_center(-1.0, 3.0, 2.0, 2.0));
        assert_eq!(d.keypoints(), &[Point2::new(1.0, 2.0)]);
        assert!((d.angle() - 0.2).abs() < 1e-6);
    }
}
