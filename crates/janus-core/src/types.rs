use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A known person from the roster.
///
/// `serial_id` is the surrogate key the recognizer was trained on;
/// `external_id` is the identifier humans use (badge / registration
/// number). Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub serial_id: u32,
    pub external_id: String,
    pub name: String,
}

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Matcher output for one detected face. Transient, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub serial_id: u32,
    /// Match distance. Lower is better.
    pub confidence: f32,
}

/// Acceptance boundary for matcher output.
///
/// The LBPH-style matchers this system is built for report a distance
/// where lower means a closer match, so acceptance is a strict
/// `confidence < threshold`. A score exactly at the threshold is
/// rejected. If a matcher with an inverted convention (higher =
/// better) is ever plugged in, this type is the single place the
/// comparison must be restated.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub threshold: f32,
}

impl MatchPolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// True iff the prediction is a trusted match.
    pub fn accepts(&self, confidence: f32) -> bool {
        confidence < self.threshold
    }
}

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("detector failed: {0}")]
    Detector(String),
    #[error("matcher failed: {0}")]
    Matcher(String),
}

/// Face detection over a grayscale frame.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Region>, RecognitionError>;
}

/// Face recognition over one detected region of a grayscale frame.
pub trait FaceMatcher: Send {
    fn predict(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
        region: &Region,
    ) -> Result<Prediction, RecognitionError>;
}

/// Human-readable session status, fed one-way to whatever front end
/// is attached. Never consumed back into the control loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    AccessGranted {
        external_id: String,
        name: String,
        confidence: f32,
    },
    /// The matcher returned a trained serial that is missing from the
    /// roster — known pattern, unregistered identity.
    UnregisteredFace { serial_id: u32, confidence: f32 },
    Unrecognized { confidence: f32 },
    AttendanceRecorded { external_id: String, name: String },
    /// Actuator transport unavailable; door control disabled for the
    /// rest of the session.
    DoorDegraded,
}

/// One-way notification channel toward the UI / operator.
pub trait StatusSink: Send {
    fn publish(&self, event: StatusEvent);
}

/// Sink that forwards events to the tracing log.
pub struct LogSink;

impl StatusSink for LogSink {
    fn publish(&self, event: StatusEvent) {
        match &event {
            StatusEvent::AccessGranted {
                external_id,
                name,
                confidence,
            } => tracing::info!(external_id, name, confidence, "access granted"),
            StatusEvent::UnregisteredFace {
                serial_id,
                confidence,
            } => tracing::warn!(serial_id, confidence, "trained face with no roster entry"),
            StatusEvent::Unrecognized { confidence } => {
                tracing::debug!(confidence, "face not recognized")
            }
            StatusEvent::AttendanceRecorded { external_id, name } => {
                tracing::info!(external_id, name, "attendance recorded")
            }
            StatusEvent::DoorDegraded => tracing::warn!("door control degraded"),
        }
    }
}
