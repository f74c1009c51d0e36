//! Webcam hand landmark feed.
//!
//! Pulls frames from a camera, finds hands in them with a palm detector and a hand landmark
//! network at most once per new frame, and publishes the latest result for the rest of the
//! program to read. See
//! [`feed::HandFeed`] for the assembled pipeline and [`pump::FramePump`] for the per-tick logic.
//!
//! # Coordinates
//!
//! Landmark coordinates are normalized to the input image: X points right and Y points *down*,
//! both in range 0 to 1. Z is depth relative to the wrist, on roughly the same scale as X.
//!
//! # Environment Variables
//!
//! * `HANDFEED_PALM_MODEL`, `HANDFEED_LANDMARK_MODEL`: palm detection and hand landmark model
//!   paths or URLs used by [`config::FeedConfig::from_env`].
//! * `HANDFEED_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s opened without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//!
//! [`Webcam`]: video::webcam::Webcam

use log::LevelFilter;

pub mod clock;
pub mod config;
pub mod detection;
pub mod detector;
pub mod feed;
pub mod filter;
pub mod hand;
pub mod handle;
pub mod landmark;
pub mod nn;
pub mod pointer;
pub mod published;
pub mod pump;
pub mod rect;
pub mod resolution;
pub mod timer;
pub mod video;

#[cfg(test)]
mod test;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("wgpu"), LevelFilter::Warn)
        .filter(Some("wonnx"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level.
///
/// `wgpu` and `wonnx` will always log at *warn* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
