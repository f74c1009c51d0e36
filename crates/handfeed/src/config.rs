//! Configuration of a [`HandFeed`](crate::feed::HandFeed).

use std::env;

use anyhow::bail;

use crate::{
    detector::{DetectorOptions, RunningMode},
    nn::{Delegate, ModelAsset},
    resolution::Resolution,
    video::{CameraConstraints, FacingMode},
};

/// Environment variable holding the palm detection model path or URL for [`FeedConfig::from_env`].
pub const ENV_VAR_PALM_MODEL: &str = "HANDFEED_PALM_MODEL";

/// Environment variable holding the hand landmark model path or URL for [`FeedConfig::from_env`].
pub const ENV_VAR_LANDMARK_MODEL: &str = "HANDFEED_LANDMARK_MODEL";

/// Everything needed to start a hand feed: detector, camera, and display rate.
///
/// There is deliberately no default [`Delegate`]; the caller picks CPU or GPU.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub(crate) detector: DetectorOptions,
    pub(crate) camera: CameraConstraints,
    pub(crate) display_hz: u32,
}

impl FeedConfig {
    pub const DEFAULT_DISPLAY_HZ: u32 = 60;

    pub fn new(palm_model: ModelAsset, landmark_model: ModelAsset, delegate: Delegate) -> Self {
        Self {
            detector: DetectorOptions::new(palm_model, landmark_model, delegate),
            camera: CameraConstraints::default(),
            display_hz: Self::DEFAULT_DISPLAY_HZ,
        }
    }

    /// Creates a configuration whose models come from the `HANDFEED_PALM_MODEL` and
    /// `HANDFEED_LANDMARK_MODEL` environment variables.
    pub fn from_env(delegate: Delegate) -> anyhow::Result<Self> {
        Self::from_lookup(delegate, |key| env::var(key).ok())
    }

    fn from_lookup(
        delegate: Delegate,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let model = |var: &str| -> anyhow::Result<ModelAsset> {
            let Some(value) = lookup(var) else {
                bail!("`{var}` must be set to a model path or URL");
            };
            let value = value.trim();
            if value.is_empty() {
                bail!("`{var}` is empty");
            }
            log::debug!("`{var}` is set to '{value}'");
            Ok(ModelAsset::parse(value))
        };
        Ok(Self::new(
            model(ENV_VAR_PALM_MODEL)?,
            model(ENV_VAR_LANDMARK_MODEL)?,
            delegate,
        ))
    }

    pub fn running_mode(mut self, mode: RunningMode) -> Self {
        self.detector = self.detector.running_mode(mode);
        self
    }

    pub fn num_hands(mut self, num_hands: usize) -> Self {
        self.detector = self.detector.num_hands(num_hands);
        self
    }

    pub fn min_detection_confidence(mut self, confidence: f32) -> Self {
        self.detector = self.detector.min_detection_confidence(confidence);
        self
    }

    pub fn min_presence(mut self, min_presence: f32) -> Self {
        self.detector = self.detector.min_presence(min_presence);
        self
    }

    pub fn min_resolution(mut self, res: Resolution) -> Self {
        self.camera = self.camera.min_resolution(res);
        self
    }

    pub fn max_resolution(mut self, res: Resolution) -> Self {
        self.camera = self.camera.max_resolution(res);
        self
    }

    /// Requests a camera frame rate of at least `fps`.
    pub fn camera_fps(mut self, fps: u32) -> Self {
        self.camera = self.camera.fps(fps);
        self
    }

    pub fn facing(mut self, facing: FacingMode) -> Self {
        self.camera = self.camera.facing(facing);
        self
    }

    pub fn camera_name(mut self, name: impl Into<String>) -> Self {
        self.camera = self.camera.name(name);
        self
    }

    /// Sets how many times per second the frame pump ticks.
    pub fn display_hz(mut self, hz: u32) -> Self {
        self.display_hz = hz;
        self
    }

    pub fn detector_options(&self) -> &DetectorOptions {
        &self.detector
    }

    pub fn camera_constraints(&self) -> &CameraConstraints {
        &self.camera
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(delegate: Delegate) -> FeedConfig {
        FeedConfig::new(
            ModelAsset::parse("palm_detection.onnx"),
            ModelAsset::parse("hand_landmark.onnx"),
            delegate,
        )
    }

    #[test]
    fn defaults() {
        let config = config(Delegate::Gpu);
        assert_eq!(config.display_hz, FeedConfig::DEFAULT_DISPLAY_HZ);
        assert_eq!(config.detector_options().delegate(), Delegate::Gpu);
        assert_eq!(config.detector_options().max_hands(), 1);
        assert!(config.camera_constraints().min_resolution.is_none());
        assert!(config.camera_constraints().facing_mode().is_none());
    }

    #[test]
    fn camera_knobs() {
        let config = config(Delegate::Cpu)
            .min_resolution(Resolution::RES_VGA)
            .max_resolution(Resolution::RES_1080P)
            .facing(FacingMode::User)
            .num_hands(2);
        let camera = config.camera_constraints();
        assert_eq!(camera.min_resolution, Some(Resolution::RES_VGA));
        assert_eq!(camera.max_resolution, Some(Resolution::RES_1080P));
        assert_eq!(camera.facing_mode(), Some(FacingMode::User));
        assert_eq!(config.detector_options().max_hands(), 2);
    }

    #[test]
    fn models_from_environment() {
        let config = FeedConfig::from_lookup(Delegate::Cpu, |key| match key {
            ENV_VAR_PALM_MODEL => Some("palm_detection.onnx".into()),
            ENV_VAR_LANDMARK_MODEL => Some(" https://example.com/hand_landmark.onnx ".into()),
            _ => panic!("unexpected variable {key}"),
        })
        .unwrap();
        let debug = format!("{:?}", config.detector_options());
        assert!(debug.contains("Path"));
        assert!(debug.contains("Url"));

        FeedConfig::from_lookup(Delegate::Cpu, |_| None).unwrap_err();
        FeedConfig::from_lookup(Delegate::Cpu, |_| Some("  ".into())).unwrap_err();
        // Both models are required.
        FeedConfig::from_lookup(Delegate::Cpu, |key| {
            (key == ENV_VAR_PALM_MODEL).then(|| "palm_detection.onnx".into())
        })
        .unwrap_err();
    }
}
