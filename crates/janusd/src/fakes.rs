//! Scripted doubles shared by the door and session tests.

use crate::door::CloseScheduler;
use janus_core::{FaceDetector, FaceMatcher, Prediction, RecognitionError, Region, StatusEvent, StatusSink};
use janus_hw::{Actuator, ActuatorError, DoorCommand, FeedError, Frame, RecognitionFeed};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records wire bytes; can be told to fail upcoming sends.
#[derive(Default)]
pub struct FakeActuator {
    pub sent: Arc<Mutex<Vec<u8>>>,
    pub reconnects: Arc<Mutex<usize>>,
    fail_remaining: Arc<Mutex<usize>>,
}

impl FakeActuator {
    /// Make the next `n` sends fail with a disconnect.
    pub fn fail_sends(&self, n: usize) {
        *self.fail_remaining.lock().unwrap() = n;
    }
}

impl Actuator for FakeActuator {
    fn send(&mut self, command: DoorCommand) -> Result<(), ActuatorError> {
        let mut remaining = self.fail_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(ActuatorError::Disconnected);
        }
        self.sent.lock().unwrap().push(command.wire_byte());
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ActuatorError> {
        *self.reconnects.lock().unwrap() += 1;
        Ok(())
    }
}

/// Scheduler whose deadlines elapse only when a test says so.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

impl ManualScheduler {
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Fire the oldest scheduled callback, as if its deadline passed.
    pub fn fire_next(&self) {
        let callback = self.queue.lock().unwrap().pop_front();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn fire_all(&self) {
        while self.pending() > 0 {
            self.fire_next();
        }
    }
}

impl CloseScheduler for ManualScheduler {
    fn schedule(&self, _delay: Duration, callback: Box<dyn FnOnce() + Send>) {
        self.queue.lock().unwrap().push_back(callback);
    }
}

/// Feed that replays a fixed list of frames, then reports EOF.
pub struct ScriptedFeed {
    frames: VecDeque<Result<Option<Frame>, FeedError>>,
}

impl ScriptedFeed {
    pub fn new(frames: Vec<Result<Option<Frame>, FeedError>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn of_frames(frames: Vec<Frame>) -> Self {
        Self::new(frames.into_iter().map(|f| Ok(Some(f))).collect())
    }
}

impl RecognitionFeed for ScriptedFeed {
    fn read(&mut self) -> Result<Option<Frame>, FeedError> {
        self.frames.pop_front().unwrap_or(Ok(None))
    }
}

/// Detector replaying one scripted result per frame.
pub struct ScriptedDetector {
    results: VecDeque<Result<Vec<Region>, RecognitionError>>,
}

impl ScriptedDetector {
    pub fn new(results: Vec<Result<Vec<Region>, RecognitionError>>) -> Self {
        Self {
            results: results.into(),
        }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _data: &[u8],
        _width: u32,
        _height: u32,
    ) -> Result<Vec<Region>, RecognitionError> {
        self.results.pop_front().unwrap_or(Ok(Vec::new()))
    }
}

/// Matcher replaying one scripted prediction per region.
pub struct ScriptedMatcher {
    results: VecDeque<Result<Prediction, RecognitionError>>,
}

impl ScriptedMatcher {
    pub fn new(results: Vec<Result<Prediction, RecognitionError>>) -> Self {
        Self {
            results: results.into(),
        }
    }
}

impl FaceMatcher for ScriptedMatcher {
    fn predict(
        &mut self,
        _data: &[u8],
        _width: u32,
        _height: u32,
        _region: &Region,
    ) -> Result<Prediction, RecognitionError> {
        self.results
            .pop_front()
            .unwrap_or(Err(RecognitionError::Matcher("script exhausted".into())))
    }
}

/// Status sink that keeps every published event.
#[derive(Default, Clone)]
pub struct CollectingSink {
    pub events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl StatusSink for CollectingSink {
    fn publish(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A small gray frame; content is irrelevant to scripted tests.
pub fn blank_frame() -> Frame {
    Frame {
        data: vec![128; 64 * 64],
        width: 64,
        height: 64,
        sequence: 0,
    }
}

pub fn full_region() -> Region {
    Region {
        x: 0,
        y: 0,
        width: 64,
        height: 64,
    }
}
