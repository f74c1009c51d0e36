use std::{cell::Cell, time::Duration};

use anyhow::bail;
use handfeed::{
    clock::{CancellationToken, FrameClock},
    detector::{HandDetector, RunningMode},
    handle::DetectorHandle,
    landmark::{DetectionResult, Handedness, LandmarkSet, NUM_LANDMARKS},
    published::Published,
    pump::{FramePump, PumpState, TickOutcome},
    video::{Frame, VideoSource},
};
use image::RgbImage;

/// Counts calls and fails on frames whose playback time is negative.
struct CountingDetector {
    mode: RunningMode,
    timestamps: Vec<u64>,
}

impl CountingDetector {
    fn new() -> Self {
        Self {
            mode: RunningMode::Image,
            timestamps: Vec::new(),
        }
    }
}

impl HandDetector for CountingDetector {
    fn running_mode(&self) -> RunningMode {
        self.mode
    }

    fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn detect(&mut self, _image: &RgbImage) -> anyhow::Result<DetectionResult> {
        bail!("only video detection is used by the pump")
    }

    fn detect_for_video(
        &mut self,
        image: &RgbImage,
        timestamp_ms: u64,
    ) -> anyhow::Result<DetectionResult> {
        assert_eq!(self.mode, RunningMode::Video);
        self.timestamps.push(timestamp_ms);
        // The test video encodes "fail this frame" as a black top-left pixel.
        if image.get_pixel(0, 0).0 == [0, 0, 0] {
            bail!("inference failed");
        }
        let n = self.timestamps.len() as f32 / 100.0;
        let hand = LandmarkSet::new(vec![[n, n, n]; NUM_LANDMARKS], Handedness::Left, 1.0)?;
        Ok(DetectionResult::from(vec![hand]))
    }
}

/// Plays back a fixed list of `(time, ok)` frames, one per sample, then repeats the last one.
struct Playback {
    frames: Vec<(f64, bool)>,
    pos: Cell<usize>,
}

impl Playback {
    fn new(frames: impl IntoIterator<Item = (f64, bool)>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            pos: Cell::new(0),
        }
    }

    fn times(times: impl IntoIterator<Item = f64>) -> Self {
        Self::new(times.into_iter().map(|t| (t, true)))
    }
}

impl VideoSource for Playback {
    fn current_frame(&self) -> Option<Frame> {
        let pos = self.pos.get();
        let &(time, ok) = self.frames.get(pos).or(self.frames.last())?;
        self.pos.set(pos + 1);
        let color = if ok { [255, 255, 255] } else { [0, 0, 0] };
        Some(Frame::new(RgbImage::from_pixel(8, 6, image::Rgb(color)), time))
    }
}

fn ready_pump(video: Playback) -> FramePump<Playback, CountingDetector> {
    FramePump::new(
        Some(video),
        DetectorHandle::ready("counting", CountingDetector::new()),
        Published::new(),
    )
}

fn calls(pump: &mut FramePump<Playback, CountingDetector>) -> usize {
    pump.detector_mut().detector().unwrap().timestamps.len()
}

#[test]
fn detects_once_per_new_frame() {
    let mut pump = ready_pump(Playback::times([0.0, 0.0, 0.033, 0.033, 0.066]));
    let outcomes = (0..5).map(|_| pump.tick()).collect::<Vec<_>>();
    assert_eq!(
        outcomes,
        [
            TickOutcome::Detected(1),
            TickOutcome::Stalled,
            TickOutcome::Detected(1),
            TickOutcome::Stalled,
            TickOutcome::Detected(1),
        ]
    );
    assert_eq!(calls(&mut pump), 3);

    let timestamps = pump.detector_mut().detector().unwrap().timestamps.clone();
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]), "{timestamps:?}");

    let published = pump.published();
    assert!(published.is_camera_running());
    assert!(published.is_detecting());
    assert_eq!(published.landmarks().len(), 1);
    assert_eq!(published.landmarks().hands()[0].landmarks()[0].x, 0.03);
}

#[test]
fn stalled_ticks_leave_published_state_alone() {
    let mut pump = ready_pump(Playback::times([0.0, 0.033, 0.033, 0.033]));
    pump.tick();
    assert_eq!(pump.tick(), TickOutcome::Detected(1));
    let before = pump.published().snapshot();
    assert_eq!(before.result_time, Some(0.033));

    for _ in 0..3 {
        assert_eq!(pump.tick(), TickOutcome::Stalled);
        assert_eq!(pump.published().snapshot(), before);
    }
    assert_eq!(calls(&mut pump), 2);
}

#[test]
fn failed_frame_keeps_previous_result() {
    let mut pump = ready_pump(Playback::new([(0.0, true), (0.033, false), (0.033, false)]));
    assert_eq!(pump.tick(), TickOutcome::Detected(1));
    let before = pump.published().landmarks();

    assert_eq!(pump.tick(), TickOutcome::Failed);
    assert_eq!(pump.published().result_time(), Some(0.0));
    assert_eq!(pump.published().landmarks().hands()[0].landmarks()[0].x, 0.01);
    assert_eq!(
        pump.published().landmarks().hands()[0].landmarks()[0].x,
        before.hands()[0].landmarks()[0].x,
    );

    // The failed frame is not retried.
    assert_eq!(pump.tick(), TickOutcome::Stalled);
    assert_eq!(calls(&mut pump), 2);
}

#[test]
fn camera_denied_stays_idle() {
    let mut pump: FramePump<Playback, CountingDetector> = FramePump::new(
        None,
        DetectorHandle::ready("counting", CountingDetector::new()),
        Published::new(),
    );
    for _ in 0..10 {
        assert_eq!(pump.tick(), TickOutcome::Idle);
    }
    assert_eq!(pump.state(), PumpState::Idle);
    assert!(!pump.published().is_camera_running());
    assert!(!pump.published().is_detecting());
    assert_eq!(calls(&mut pump), 0);
}

#[test]
fn construction_failure_is_contained() {
    let mut handle: DetectorHandle<CountingDetector> =
        DetectorHandle::spawn("broken", || bail!("model file not found"));
    assert!(!handle.wait());
    assert!(handle.is_failed());

    let mut pump = FramePump::new(
        Some(Playback::times([0.0, 0.033, 0.066])),
        handle,
        Published::new(),
    );
    for _ in 0..3 {
        assert_eq!(pump.tick(), TickOutcome::DetectorNotReady);
    }
    assert!(pump.published().is_camera_running());
    assert!(!pump.published().is_detecting());
    assert!(pump.published().landmarks().is_empty());
}

#[test]
fn background_construction_then_detection() {
    let mut handle = DetectorHandle::spawn("slow", || {
        std::thread::sleep(Duration::from_millis(20));
        Ok(CountingDetector::new())
    });
    assert!(handle.wait());

    let mut pump = FramePump::new(
        Some(Playback::times([0.0, 0.033])),
        handle,
        Published::new(),
    );
    assert_eq!(pump.tick(), TickOutcome::Detected(1));
    assert_eq!(pump.tick(), TickOutcome::Detected(1));
    assert_eq!(
        pump.detector_mut().detector().unwrap().running_mode(),
        RunningMode::Video
    );
}

#[test]
fn one_call_per_distinct_frame() {
    for _ in 0..50 {
        let mut times = Vec::new();
        let mut t = 0.0;
        for _ in 0..fastrand::usize(1..40) {
            if fastrand::bool() {
                t += 1.0 / 30.0;
            }
            times.push(t);
        }
        let distinct = 1 + times.windows(2).filter(|w| w[0] != w[1]).count();

        let ticks = times.len();
        let mut pump = ready_pump(Playback::times(times));
        let detected = (0..ticks)
            .filter(|_| matches!(pump.tick(), TickOutcome::Detected(_)))
            .count();
        assert_eq!(detected, distinct);
        assert_eq!(calls(&mut pump), distinct);
    }
}

/// Cancels the token after a fixed number of frames.
struct Countdown {
    left: usize,
    token: CancellationToken,
}

impl FrameClock for Countdown {
    fn wait_next_frame(&mut self) {
        if self.left == 0 {
            self.token.cancel();
        } else {
            self.left -= 1;
        }
    }
}

#[test]
fn run_stops_on_cancellation() {
    let token = CancellationToken::new();
    let mut pump = ready_pump(Playback::times([0.0, 0.033, 0.066, 0.1]));
    let published = pump.published().clone();

    pump.run(
        Countdown {
            left: 4,
            token: token.clone(),
        },
        &token,
    );

    assert!(token.is_cancelled());
    assert_eq!(pump.state(), PumpState::Idle);
    assert!(!published.is_camera_running());
    assert_eq!(calls(&mut pump), 4);
    // The last result stays readable after the pump stops.
    assert_eq!(published.landmarks().len(), 1);
}
