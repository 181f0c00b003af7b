//! janus-hw — hardware abstraction for the door access system.
//!
//! Provides the serial actuator transport (single-byte open/close
//! protocol) and a V4L2-backed recognition feed.

pub mod actuator;
pub mod feed;

pub use actuator::{Actuator, ActuatorError, DoorCommand, SerialActuator};
pub use feed::{CameraFeed, FeedError, Frame, RecognitionFeed};
