//! The recognition session: one run of the frame loop from start to
//! cleanup.
//!
//! The loop is synchronous and runs on its own thread; it blocks only
//! on the feed and on detect/predict. Cancellation is cooperative,
//! checked once per iteration, and never interrupts an in-flight
//! recognition call.

use crate::door::DoorController;
use chrono::NaiveDateTime;
use janus_core::{
    AttendanceLedger, DirectoryError, FaceDetector, FaceMatcher, IdentityDirectory, LedgerError,
    MatchPolicy, RecordOutcome, StatusEvent, StatusSink,
};
use janus_hw::{FeedError, RecognitionFeed};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("roster unavailable: {0}")]
    Roster(#[from] DirectoryError),
    #[error("recognition model artifact missing: {0}")]
    ModelMissing(String),
    #[error("recognition feed failed: {0}")]
    Feed(#[from] FeedError),
    #[error("attendance persistence failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Paths and policy for one session.
pub struct SessionConfig {
    pub roster_path: PathBuf,
    pub model_path: PathBuf,
    pub attendance_dir: PathBuf,
    pub policy: MatchPolicy,
}

/// Counters returned when a session ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub frames: u64,
    pub faces: u64,
    pub accepted: u64,
    pub records_flushed: usize,
}

/// A started session, ready to run its frame loop.
pub struct Session {
    directory: IdentityDirectory,
    ledger: AttendanceLedger,
    feed: Box<dyn RecognitionFeed>,
    detector: Box<dyn FaceDetector>,
    matcher: Box<dyn FaceMatcher>,
    door: Option<DoorController>,
    status: Box<dyn StatusSink>,
    policy: MatchPolicy,
    cancel: CancellationToken,
    door_opened: bool,
    clock: fn() -> NaiveDateTime,
}

fn wall_clock() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl Session {
    /// Load the roster, verify the model artifact, open the feed.
    ///
    /// Fails before the feed is touched when the roster or the model
    /// artifact is unusable. No actuator command can be issued until
    /// this has succeeded; door commands only flow from a running
    /// session.
    pub fn start(
        config: SessionConfig,
        detector: Box<dyn FaceDetector>,
        matcher: Box<dyn FaceMatcher>,
        open_feed: impl FnOnce() -> Result<Box<dyn RecognitionFeed>, FeedError>,
        door: Option<DoorController>,
        status: Box<dyn StatusSink>,
        cancel: CancellationToken,
    ) -> Result<Self, SessionError> {
        let directory = IdentityDirectory::load(&config.roster_path)?;
        if !config.model_path.exists() {
            return Err(SessionError::ModelMissing(
                config.model_path.display().to_string(),
            ));
        }

        let feed = open_feed()?;
        tracing::info!(
            identities = directory.len(),
            threshold = config.policy.threshold,
            "session started"
        );

        Ok(Self {
            directory,
            ledger: AttendanceLedger::new(&config.attendance_dir),
            feed,
            detector,
            matcher,
            door,
            status,
            policy: config.policy,
            cancel,
            door_opened: false,
            clock: wall_clock,
        })
    }

    /// Drive the frame loop until cancellation, end of stream, or a
    /// fatal feed error, then run the shutdown sequence.
    pub fn run(mut self) -> Result<SessionReport, SessionError> {
        let mut report = SessionReport::default();

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("session cancelled");
                break;
            }

            let frame = match self.feed.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("recognition feed ended");
                    break;
                }
                Err(err) => {
                    tracing::error!(error = %err, "fatal feed error, stopping session");
                    if let Err(flush_err) = self.shutdown(&mut report) {
                        tracing::error!(error = %flush_err, "flush during shutdown also failed");
                    }
                    return Err(err.into());
                }
            };
            report.frames += 1;

            let regions = match self.detector.detect(&frame.data, frame.width, frame.height) {
                Ok(regions) => regions,
                Err(err) => {
                    tracing::warn!(error = %err, "detector failed, skipping frame");
                    continue;
                }
            };

            for region in &regions {
                report.faces += 1;
                let prediction =
                    match self
                        .matcher
                        .predict(&frame.data, frame.width, frame.height, region)
                    {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::warn!(error = %err, "matcher failed, skipping frame");
                            break;
                        }
                    };

                if !self.policy.accepts(prediction.confidence) {
                    self.status.publish(StatusEvent::Unrecognized {
                        confidence: prediction.confidence,
                    });
                    continue;
                }

                let Some(identity) = self.directory.lookup(prediction.serial_id) else {
                    self.status.publish(StatusEvent::UnregisteredFace {
                        serial_id: prediction.serial_id,
                        confidence: prediction.confidence,
                    });
                    continue;
                };
                let identity = identity.clone();
                report.accepted += 1;

                if let Some(door) = &self.door {
                    if door.request_open() {
                        self.door_opened = true;
                    }
                }
                self.status.publish(StatusEvent::AccessGranted {
                    external_id: identity.external_id.clone(),
                    name: identity.name.clone(),
                    confidence: prediction.confidence,
                });

                // Attendance is independent of door success: a dead
                // actuator must not lose the record.
                let now = (self.clock)();
                let outcome = self.ledger.record_if_absent(
                    &identity.external_id,
                    &identity.name,
                    now.date(),
                    now.time(),
                );
                if outcome == RecordOutcome::Recorded {
                    self.status.publish(StatusEvent::AttendanceRecorded {
                        external_id: identity.external_id,
                        name: identity.name,
                    });
                }
            }
        }

        self.shutdown(&mut report)?;
        Ok(report)
    }

    /// Stopping sequence: close the feed, close the door if this
    /// session opened it (always wins over a still-armed timer),
    /// flush the ledger. A flush failure keeps records in memory and
    /// is surfaced to the caller.
    fn shutdown(&mut self, report: &mut SessionReport) -> Result<(), SessionError> {
        if self.door_opened {
            if let Some(door) = &self.door {
                door.close_now();
            }
            self.door_opened = false;
        }

        // Every pending date, not just today's: a session that ran
        // across midnight holds records for two dates.
        for date in self.ledger.pending_dates() {
            report.records_flushed += self.ledger.flush(date)?;
        }
        tracing::info!(?report, "session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::door::DoorController;
    use crate::fakes::{
        blank_frame, full_region, CollectingSink, FakeActuator, ManualScheduler, ScriptedDetector,
        ScriptedFeed, ScriptedMatcher,
    };
    use chrono::{NaiveDate, NaiveDateTime};
    use janus_core::{ledger, Prediction, RecognitionError};
    use std::sync::Arc;
    use std::time::Duration;

    const THRESHOLD: f32 = 65.0;

    fn test_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, 12)
            .unwrap()
            .and_hms_opt(9, 10, 0)
            .unwrap()
    }

    fn test_date() -> NaiveDate {
        test_clock().date()
    }

    struct Harness {
        tmp: tempfile::TempDir,
        sink: CollectingSink,
        scheduler: Arc<ManualScheduler>,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            std::fs::write(
                tmp.path().join("roster.csv"),
                "SerialNo,ExternalId,Name\n3,1007,Ana\n4,1011,Bruno\n",
            )
            .unwrap();
            std::fs::write(tmp.path().join("templates.json"), "{\"templates\":[]}").unwrap();
            Self {
                tmp,
                sink: CollectingSink::default(),
                scheduler: Arc::new(ManualScheduler::default()),
            }
        }

        fn config(&self) -> SessionConfig {
            SessionConfig {
                roster_path: self.tmp.path().join("roster.csv"),
                model_path: self.tmp.path().join("templates.json"),
                attendance_dir: self.tmp.path().join("attendance"),
                policy: MatchPolicy::new(THRESHOLD),
            }
        }

        fn door(&self, actuator: FakeActuator) -> DoorController {
            DoorController::new(
                Box::new(actuator),
                self.scheduler.clone(),
                Duration::from_secs(4),
            )
        }

        fn start(
            &self,
            frames: usize,
            detector: ScriptedDetector,
            matcher: ScriptedMatcher,
            door: Option<DoorController>,
        ) -> Session {
            let feed = ScriptedFeed::of_frames((0..frames).map(|_| blank_frame()).collect());
            let mut session = Session::start(
                self.config(),
                Box::new(detector),
                Box::new(matcher),
                || Ok(Box::new(feed) as Box<dyn RecognitionFeed>),
                door,
                Box::new(self.sink.clone()),
                CancellationToken::new(),
            )
            .unwrap();
            session.clock = test_clock;
            session
        }
    }

    #[test]
    fn test_accepted_identity_opens_door_and_records() {
        let h = Harness::new();
        let actuator = FakeActuator::default();
        let sent = actuator.sent.clone();
        let door = h.door(actuator);

        let session = h.start(
            1,
            ScriptedDetector::new(vec![Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 3,
                confidence: 40.0,
            })]),
            Some(door),
        );

        let report = session.run().unwrap();
        assert_eq!(report.frames, 1);
        assert_eq!(report.accepted, 1);
        assert_eq!(report.records_flushed, 1);

        // Open, then the shutdown close (which cancelled the timer).
        assert_eq!(*sent.lock().unwrap(), vec![b'O', b'F']);
        h.scheduler.fire_all();
        assert_eq!(*sent.lock().unwrap(), vec![b'O', b'F']);

        let records =
            ledger::read_partition(&h.tmp.path().join("attendance"), test_date()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "1007");
        assert_eq!(records[0].name, "Ana");

        let events = h.sink.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            StatusEvent::AccessGranted { external_id, .. } if external_id == "1007"
        )));
    }

    #[test]
    fn test_same_identity_twice_records_once() {
        let h = Harness::new();
        let prediction = || {
            Ok(Prediction {
                serial_id: 3,
                confidence: 40.0,
            })
        };
        let session = h.start(
            2,
            ScriptedDetector::new(vec![Ok(vec![full_region()]), Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![prediction(), prediction()]),
            None,
        );

        let report = session.run().unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.records_flushed, 1);

        let records =
            ledger::read_partition(&h.tmp.path().join("attendance"), test_date()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_confidence_at_threshold_rejected() {
        let h = Harness::new();
        let actuator = FakeActuator::default();
        let sent = actuator.sent.clone();
        let door = h.door(actuator);

        let session = h.start(
            1,
            ScriptedDetector::new(vec![Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 3,
                confidence: THRESHOLD,
            })]),
            Some(door),
        );

        let report = session.run().unwrap();
        assert_eq!(report.accepted, 0);
        assert!(sent.lock().unwrap().is_empty());
        assert!(h
            .sink
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, StatusEvent::Unrecognized { .. })));
    }

    #[test]
    fn test_unregistered_serial_is_status_only() {
        let h = Harness::new();
        let actuator = FakeActuator::default();
        let sent = actuator.sent.clone();
        let door = h.door(actuator);

        let session = h.start(
            1,
            ScriptedDetector::new(vec![Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 99,
                confidence: 10.0,
            })]),
            Some(door),
        );

        let report = session.run().unwrap();
        assert_eq!(report.accepted, 0);
        assert_eq!(report.records_flushed, 0);
        assert!(sent.lock().unwrap().is_empty());
        assert!(h.sink.events.lock().unwrap().iter().any(|e| matches!(
            e,
            StatusEvent::UnregisteredFace { serial_id: 99, .. }
        )));
    }

    #[test]
    fn test_detector_error_skips_frame() {
        let h = Harness::new();
        let session = h.start(
            2,
            ScriptedDetector::new(vec![
                Err(RecognitionError::Detector("camera glitch".into())),
                Ok(vec![full_region()]),
            ]),
            ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 3,
                confidence: 40.0,
            })]),
            None,
        );

        let report = session.run().unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.accepted, 1);
    }

    #[test]
    fn test_degraded_door_still_records() {
        let h = Harness::new();
        let session = h.start(
            1,
            ScriptedDetector::new(vec![Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 4,
                confidence: 20.0,
            })]),
            None,
        );

        let report = session.run().unwrap();
        assert_eq!(report.records_flushed, 1);
        let records =
            ledger::read_partition(&h.tmp.path().join("attendance"), test_date()).unwrap();
        assert_eq!(records[0].external_id, "1011");
    }

    #[test]
    fn test_door_not_closed_when_never_opened() {
        let h = Harness::new();
        let actuator = FakeActuator::default();
        let sent = actuator.sent.clone();
        let door = h.door(actuator);

        let session = h.start(
            1,
            ScriptedDetector::new(vec![Ok(Vec::new())]),
            ScriptedMatcher::new(vec![]),
            Some(door),
        );

        session.run().unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancellation_stops_loop() {
        let h = Harness::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let feed = ScriptedFeed::of_frames(vec![blank_frame(), blank_frame()]);
        let session = Session::start(
            h.config(),
            Box::new(ScriptedDetector::new(vec![])),
            Box::new(ScriptedMatcher::new(vec![])),
            || Ok(Box::new(feed) as Box<dyn RecognitionFeed>),
            None,
            Box::new(h.sink.clone()),
            cancel,
        )
        .unwrap();

        let report = session.run().unwrap();
        assert_eq!(report.frames, 0);
    }

    #[test]
    fn test_missing_roster_fails_start_without_commands() {
        let h = Harness::new();
        let actuator = FakeActuator::default();
        let sent = actuator.sent.clone();
        let door = h.door(actuator);

        let mut config = h.config();
        config.roster_path = h.tmp.path().join("missing.csv");

        let result = Session::start(
            config,
            Box::new(ScriptedDetector::new(vec![])),
            Box::new(ScriptedMatcher::new(vec![])),
            || Ok(Box::new(ScriptedFeed::new(vec![])) as Box<dyn RecognitionFeed>),
            Some(door),
            Box::new(h.sink.clone()),
            CancellationToken::new(),
        );

        assert!(matches!(result.err(), Some(SessionError::Roster(_))));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_roster_fails_start() {
        let h = Harness::new();
        std::fs::write(h.tmp.path().join("roster.csv"), "SerialNo,ExternalId,Name\n").unwrap();

        let result = Session::start(
            h.config(),
            Box::new(ScriptedDetector::new(vec![])),
            Box::new(ScriptedMatcher::new(vec![])),
            || Ok(Box::new(ScriptedFeed::new(vec![])) as Box<dyn RecognitionFeed>),
            None,
            Box::new(h.sink.clone()),
            CancellationToken::new(),
        );
        assert!(matches!(result.err(), Some(SessionError::Roster(_))));
    }

    #[test]
    fn test_missing_model_fails_start() {
        let h = Harness::new();
        let mut config = h.config();
        config.model_path = h.tmp.path().join("missing-model.json");

        let result = Session::start(
            config,
            Box::new(ScriptedDetector::new(vec![])),
            Box::new(ScriptedMatcher::new(vec![])),
            || Ok(Box::new(ScriptedFeed::new(vec![])) as Box<dyn RecognitionFeed>),
            None,
            Box::new(h.sink.clone()),
            CancellationToken::new(),
        );
        assert!(matches!(result.err(), Some(SessionError::ModelMissing(_))));
    }

    #[test]
    fn test_session_across_midnight_flushes_both_dates() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static TICKS: AtomicUsize = AtomicUsize::new(0);
        fn midnight_clock() -> NaiveDateTime {
            let first = TICKS.fetch_add(1, Ordering::SeqCst) == 0;
            let (day, h, m) = if first { (12, 23, 59) } else { (13, 0, 0) };
            NaiveDate::from_ymd_opt(2025, 5, day)
                .unwrap()
                .and_hms_opt(h, m, 30)
                .unwrap()
        }

        let h = Harness::new();
        let mut session = h.start(
            2,
            ScriptedDetector::new(vec![Ok(vec![full_region()]), Ok(vec![full_region()])]),
            ScriptedMatcher::new(vec![
                Ok(Prediction {
                    serial_id: 3,
                    confidence: 40.0,
                }),
                Ok(Prediction {
                    serial_id: 4,
                    confidence: 40.0,
                }),
            ]),
            None,
        );
        session.clock = midnight_clock;

        let report = session.run().unwrap();
        assert_eq!(report.records_flushed, 2);

        let attendance = h.tmp.path().join("attendance");
        let before = ledger::read_partition(
            &attendance,
            NaiveDate::from_ymd_opt(2025, 5, 12).unwrap(),
        )
        .unwrap();
        let after = ledger::read_partition(
            &attendance,
            NaiveDate::from_ymd_opt(2025, 5, 13).unwrap(),
        )
        .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].external_id, "1007");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].external_id, "1011");
    }

    #[test]
    fn test_fatal_feed_error_still_flushes() {
        let h = Harness::new();
        let feed = ScriptedFeed::new(vec![
            Ok(Some(blank_frame())),
            Err(FeedError::ReadFailed("gone".into())),
        ]);
        let mut session = Session::start(
            h.config(),
            Box::new(ScriptedDetector::new(vec![Ok(vec![full_region()])])),
            Box::new(ScriptedMatcher::new(vec![Ok(Prediction {
                serial_id: 3,
                confidence: 40.0,
            })])),
            || Ok(Box::new(feed) as Box<dyn RecognitionFeed>),
            None,
            Box::new(h.sink.clone()),
            CancellationToken::new(),
        )
        .unwrap();
        session.clock = test_clock;

        assert!(matches!(session.run(), Err(SessionError::Feed(_))));
        let records =
            ledger::read_partition(&h.tmp.path().join("attendance"), test_date()).unwrap();
        assert_eq!(records.len(), 1);
    }
}
