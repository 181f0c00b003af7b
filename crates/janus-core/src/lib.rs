//! janus-core — domain model for the door access system.
//!
//! Holds the identity directory loaded from the roster, the
//! date-partitioned attendance ledger, the match acceptance policy,
//! and the traits behind which detection and recognition live.

pub mod directory;
pub mod lbp;
pub mod ledger;
pub mod types;

pub use directory::{DirectoryError, IdentityDirectory};
pub use lbp::{LbpMatcher, ModelError, PresenceDetector};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, RecordOutcome};
pub use types::{
    FaceDetector, FaceMatcher, Identity, LogSink, MatchPolicy, Prediction, RecognitionError,
    Region, StatusEvent, StatusSink,
};
