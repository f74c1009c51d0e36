//! Hand-specific networks: palm detection and hand landmark estimation.
//!
//! Palms are rigid and roughly square, which makes them far easier to detect than whole hands.
//! The palm detector runs on the full frame; each palm is then grown into a rotated region that
//! covers the whole hand, and the landmark network only looks at that region. Once landmarks are
//! known, their rotated bounding box becomes the region to look at in the next frame.

pub mod detection;
pub mod landmark;

use anyhow::bail;
use nalgebra::{Point2, Rotation2, Vector2};

use crate::{nn::NeuralNetwork, resolution::Resolution};

/// Computes the clockwise rotation of a hand, where `0.0` means the fingers point up.
fn upright_angle(wrist: Point2<f32>, finger: Point2<f32>) -> f32 {
    let rel: Vector2<f32> = wrist - finger;
    if rel == Vector2::zeros() {
        return 0.0;
    }
    Rotation2::rotation_between(&Vector2::y(), &rel).angle()
}

/// Returns the input resolution of a network taking a single NCHW RGB image.
fn image_input(nn: &NeuralNetwork, what: &str) -> anyhow::Result<Resolution> {
    let [input] = nn.inputs() else {
        bail!(
            "{what} network must take exactly 1 input, this one takes {}",
            nn.inputs().len()
        );
    };
    let &[1, 3, h, w] = input.shape() else {
        bail!(
            "{what} network input must be NCHW RGB, got shape {:?}",
            input.shape()
        );
    };
    if w == 0 || h == 0 {
        bail!("{what} network has an empty input");
    }
    Ok(Resolution::new(w.try_into()?, h.try_into()?))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn upright_angle_follows_fingers() {
        let wrist = Point2::new(10.0, 20.0);
        assert_relative_eq!(upright_angle(wrist, Point2::new(10.0, 10.0)), 0.0);
        // Fingers pointing right on screen is a quarter turn clockwise.
        assert_relative_eq!(upright_angle(wrist, Point2::new(20.0, 20.0)), FRAC_PI_2);
        assert_relative_eq!(upright_angle(wrist, Point2::new(0.0, 20.0)), -FRAC_PI_2);
        assert_eq!(upright_angle(wrist, wrist), 0.0);
    }
}
