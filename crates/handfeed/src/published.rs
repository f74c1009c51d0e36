//! The latest detection result, shared with consumers.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use crate::{landmark::DetectionResult, resolution::Resolution};

/// Shared, read-mostly view of what the frame pump has produced so far.
///
/// This is a cheaply [`Clone`]able handle; all clones observe the same state. Only the frame pump
/// writes to it. Results are replaced as a whole, so readers never see a partially updated
/// result.
#[derive(Clone, Default)]
pub struct Published {
    inner: Arc<Inner>,
}

/// Everything a reader can observe through a [`Published`] handle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub landmarks: DetectionResult,
    /// Playback time, in seconds, of the frame `landmarks` were detected in.
    pub result_time: Option<f64>,
    pub camera_running: bool,
    pub detecting: bool,
    pub video_resolution: Option<Resolution>,
}

#[derive(Default)]
struct Inner {
    latest: Mutex<Latest>,
    resolution: Mutex<Option<Resolution>>,
    camera_running: AtomicBool,
    detecting: AtomicBool,
}

/// A result and the frame it came from, always replaced together.
#[derive(Default)]
struct Latest {
    result: DetectionResult,
    video_time: Option<f64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every write replaces the value in a single assignment, so a poisoned lock still holds
    // consistent data.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Published {
    /// Creates an empty state: no hands, camera not running, not detecting.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hands found by the most recent completed detection.
    ///
    /// Before the first successful detection this is empty.
    pub fn landmarks(&self) -> DetectionResult {
        lock(&self.inner.latest).result.clone()
    }

    /// Returns the playback time of the frame that [`Published::landmarks`] were detected in.
    ///
    /// Readers polling this state can compare it with the previous value to tell a new result
    /// from one they have already seen.
    pub fn result_time(&self) -> Option<f64> {
        lock(&self.inner.latest).video_time
    }

    /// Returns the landmarks together with the time of the frame they came from.
    pub fn latest(&self) -> (Option<f64>, DetectionResult) {
        let latest = lock(&self.inner.latest);
        (latest.video_time, latest.result.clone())
    }

    /// Reads every published value.
    pub fn snapshot(&self) -> Snapshot {
        let (result_time, landmarks) = self.latest();
        Snapshot {
            landmarks,
            result_time,
            camera_running: self.is_camera_running(),
            detecting: self.is_detecting(),
            video_resolution: self.video_resolution(),
        }
    }

    /// Returns whether a camera stream is attached and being pumped.
    pub fn is_camera_running(&self) -> bool {
        self.inner.camera_running.load(Ordering::Acquire)
    }

    /// Returns whether the detector has produced at least one result.
    pub fn is_detecting(&self) -> bool {
        self.inner.detecting.load(Ordering::Acquire)
    }

    /// Returns the dimensions of the most recent video frame.
    pub fn video_resolution(&self) -> Option<Resolution> {
        *lock(&self.inner.resolution)
    }

    /// Serializes the current landmarks as a JSON list of hands, each a list of `{x, y, z}`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.landmarks())
    }

    pub(crate) fn publish_result(&self, result: DetectionResult, video_time: f64) {
        *lock(&self.inner.latest) = Latest {
            result,
            video_time: Some(video_time),
        };
        self.inner.detecting.store(true, Ordering::Release);
    }

    pub(crate) fn set_camera_running(&self, running: bool) {
        self.inner.camera_running.store(running, Ordering::Release);
    }

    pub(crate) fn set_video_resolution(&self, resolution: Resolution) {
        let mut current = lock(&self.inner.resolution);
        if *current != Some(resolution) {
            log::debug!("video resolution is now {resolution}");
            *current = Some(resolution);
        }
    }
}
