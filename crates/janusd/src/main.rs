use anyhow::Result;
use janus_core::{LbpMatcher, LogSink, MatchPolicy, PresenceDetector, StatusEvent, StatusSink};
use janus_hw::{CameraFeed, RecognitionFeed, SerialActuator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod door;
#[cfg(test)]
mod fakes;
mod session;

use config::Config;
use door::{DoorController, TokioScheduler};
use session::{Session, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("janusd starting");
    let config = Config::from_env();
    let status = LogSink;

    // A dead actuator degrades door control but never blocks
    // recognition or attendance.
    let door = match SerialActuator::connect(
        &config.actuator_device,
        config.actuator_baud,
        config.connect_timeout(),
        config.settle_delay(),
    ) {
        Ok(actuator) => Some(DoorController::new(
            Box::new(actuator),
            Arc::new(TokioScheduler::new(tokio::runtime::Handle::current())),
            config.auto_close_delay(),
        )),
        Err(err) => {
            tracing::warn!(error = %err, "actuator unavailable, door control disabled");
            status.publish(StatusEvent::DoorDegraded);
            None
        }
    };

    let detector = Box::new(PresenceDetector::default());
    let matcher = Box::new(LbpMatcher::load(&config.model_path)?);

    let cancel = CancellationToken::new();
    let camera_device = config.camera_device.clone();
    let session = Session::start(
        SessionConfig {
            roster_path: config.roster_path.clone(),
            model_path: config.model_path.clone(),
            attendance_dir: config.attendance_dir.clone(),
            policy: MatchPolicy::new(config.confidence_threshold),
        },
        detector,
        matcher,
        move || CameraFeed::open(&camera_device).map(|f| Box::new(f) as Box<dyn RecognitionFeed>),
        door.clone(),
        Box::new(LogSink),
        cancel.clone(),
    )?;

    let mut session_task = tokio::task::spawn_blocking(move || session.run());
    tracing::info!("janusd ready");

    let joined = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("stop requested, cancelling session");
            cancel.cancel();
            (&mut session_task).await
        }
        joined = &mut session_task => joined,
    };

    match joined {
        Ok(Ok(report)) => tracing::info!(
            frames = report.frames,
            accepted = report.accepted,
            flushed = report.records_flushed,
            "session finished"
        ),
        Ok(Err(err)) => tracing::error!(error = %err, "session ended with error"),
        Err(err) => tracing::error!(error = %err, "session task panicked"),
    }

    // Final safety shutdown. The session already closed the door if
    // it opened it; one more close covers abnormal exits and is
    // harmless otherwise.
    if let Some(door) = &door {
        door.close_now();
    }

    tracing::info!("janusd shutting down");
    Ok(())
}
