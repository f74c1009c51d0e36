//! Lazily constructed detector instances.

use std::{
    error::Error,
    fmt, mem,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, bail};
use pawawwewism::{promise, Promise, PromiseHandle, Worker};

use crate::{
    detector::{HandDetector, RunningMode},
    landmark::DetectionResult,
    video::Frame,
};

/// Error returned when a [`DetectorHandle`] is used before its detector has been constructed.
#[derive(Debug, Clone, Copy)]
pub struct NotReady {
    _priv: (),
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("detector is not ready")
    }
}

impl Error for NotReady {}

enum State<D: Send + 'static> {
    Pending(Construction<D>),
    Ready(D),
    Failed,
}

/// A detector being built on its own worker thread.
struct Construction<D: Send + 'static> {
    result: PromiseHandle<anyhow::Result<D>>,
    /// Set once `result` has been fulfilled, so that readiness can be checked without blocking.
    settled: Arc<AtomicBool>,
    _worker: Worker<Promise<anyhow::Result<D>>>,
}

/// Owns a detector that is constructed once, in the background, and reused for every frame.
///
/// Construction failures are logged and leave the handle permanently not ready; callers are
/// expected to check [`DetectorHandle::is_ready`] before detecting.
///
/// Dropping a handle whose detector is still being constructed blocks until construction is done.
pub struct DetectorHandle<D: Send + 'static> {
    name: String,
    state: State<D>,
}

impl<D: Send + 'static> DetectorHandle<D> {
    /// Starts constructing a detector on a worker thread.
    ///
    /// A panicking constructor is reported like a failing one.
    pub fn spawn<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<D> + Send + 'static,
    {
        let name = name.into();
        let state = match Self::construct(&name, constructor) {
            Ok(construction) => State::Pending(construction),
            Err(e) => {
                log::error!("failed to spawn {name} construction thread: {e}");
                State::Failed
            }
        };
        Self { name, state }
    }

    fn construct<F>(name: &str, constructor: F) -> std::io::Result<Construction<D>>
    where
        F: FnOnce() -> anyhow::Result<D> + Send + 'static,
    {
        let settled = Arc::new(AtomicBool::new(false));
        let mut constructor = Some(constructor);
        let mut worker = Worker::builder().name(format!("{name} init")).spawn({
            let settled = settled.clone();
            move |promise: Promise<anyhow::Result<D>>| {
                let result = match constructor.take() {
                    Some(constructor) => catch_unwind(AssertUnwindSafe(constructor))
                        .unwrap_or_else(|_| Err(anyhow!("constructor panicked"))),
                    None => Err(anyhow!("detector was already constructed")),
                };
                promise.fulfill(result);
                settled.store(true, Ordering::Release);
            }
        })?;

        let (promise, result) = promise();
        worker.send(promise);
        Ok(Construction {
            result,
            settled,
            _worker: worker,
        })
    }

    /// Wraps an already-constructed detector.
    pub fn ready(name: impl Into<String>, detector: D) -> Self {
        Self {
            name: name.into(),
            state: State::Ready(detector),
        }
    }

    /// Returns whether construction has finished successfully.
    ///
    /// This never blocks. Once construction has finished (successfully or not), the outcome is
    /// recorded and later calls are cheap.
    pub fn is_ready(&mut self) -> bool {
        if let State::Pending(construction) = &self.state {
            if !construction.settled.load(Ordering::Acquire) {
                return false;
            }
            self.wait();
        }
        matches!(self.state, State::Ready(_))
    }

    /// Returns whether construction failed. A failed handle never becomes ready.
    pub fn is_failed(&mut self) -> bool {
        self.is_ready();
        matches!(self.state, State::Failed)
    }

    /// Blocks until construction has finished, returning whether it succeeded.
    pub fn wait(&mut self) -> bool {
        if let State::Pending(_) = self.state {
            let State::Pending(construction) = mem::replace(&mut self.state, State::Failed) else {
                unreachable!()
            };
            self.finish(construction.result.block().ok());
        }
        matches!(self.state, State::Ready(_))
    }

    fn finish(&mut self, result: Option<anyhow::Result<D>>) {
        self.state = match result {
            Some(Ok(detector)) => {
                log::info!("{} ready", self.name);
                State::Ready(detector)
            }
            Some(Err(e)) => {
                log::error!("failed to create {}: {e:#}", self.name);
                State::Failed
            }
            None => {
                log::error!("{} construction thread exited without a result", self.name);
                State::Failed
            }
        };
    }

    /// Returns the detector if it is ready.
    pub fn detector(&mut self) -> Option<&mut D> {
        self.is_ready();
        match &mut self.state {
            State::Ready(detector) => Some(detector),
            _ => None,
        }
    }

    fn ready_detector(&mut self) -> anyhow::Result<&mut D> {
        match self.detector() {
            Some(detector) => Ok(detector),
            None => Err(NotReady { _priv: () }.into()),
        }
    }
}

impl<D: HandDetector + Send + 'static> DetectorHandle<D> {
    /// Switches the detector's running mode.
    ///
    /// Fails with [`NotReady`] if the detector has not been constructed.
    pub fn set_running_mode(&mut self, mode: RunningMode) -> anyhow::Result<()> {
        self.ready_detector()?.set_running_mode(mode)
    }

    /// Runs the detector on a video frame.
    ///
    /// Fails with [`NotReady`] if the detector has not been constructed, and with an error if the
    /// detector is not in [`RunningMode::Video`].
    pub fn detect(&mut self, frame: &Frame, timestamp_ms: u64) -> anyhow::Result<DetectionResult> {
        let detector = self.ready_detector()?;
        let mode = detector.running_mode();
        if mode != RunningMode::Video {
            bail!("frame detection needs {} mode, detector is in {mode} mode", RunningMode::Video);
        }
        detector.detect_for_video(frame.image(), timestamp_ms)
    }
}
