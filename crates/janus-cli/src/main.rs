use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use janus_core::{ledger, IdentityDirectory};
use janus_hw::{Actuator, CameraFeed, DoorCommand, RecognitionFeed, SerialActuator};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "janus", about = "Janus door access operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the identity roster
    Roster {
        /// Roster CSV path
        #[arg(long)]
        path: PathBuf,
    },
    /// Show the attendance partition for a date
    Attendance {
        /// Attendance directory
        #[arg(long)]
        dir: PathBuf,
        /// Date as DD-MM-YYYY (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// Send one door command directly (diagnostics)
    Door {
        /// Serial device of the actuator
        #[arg(long, default_value = "/dev/ttyUSB0")]
        device: PathBuf,
        #[arg(long, default_value_t = 9600)]
        baud: u32,
        /// "open" or "close"
        action: String,
    },
    /// Read a few frames from the camera and report geometry
    CameraTest {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 5)]
        frames: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Roster { path } => {
            let directory = IdentityDirectory::load(&path)?;
            println!("{} identities", directory.len());
            let mut rows: Vec<_> = directory.iter().collect();
            rows.sort_by_key(|i| i.serial_id);
            for identity in rows {
                println!(
                    "{:>6}  {:>12}  {}",
                    identity.serial_id, identity.external_id, identity.name
                );
            }
        }
        Commands::Attendance { dir, date } => {
            let date = match date {
                Some(raw) => NaiveDate::parse_from_str(&raw, "%d-%m-%Y")
                    .context("date must be DD-MM-YYYY")?,
                None => chrono::Local::now().date_naive(),
            };
            let records = ledger::read_partition(&dir, date)?;
            if records.is_empty() {
                println!("no attendance for {}", date.format("%d-%m-%Y"));
            }
            for record in records {
                println!(
                    "{:>12}  {:<24}  {}  {}",
                    record.external_id,
                    record.name,
                    record.date.format("%d-%m-%Y"),
                    record.time.format("%I:%M:%S %p")
                );
            }
        }
        Commands::Door {
            device,
            baud,
            action,
        } => {
            let command = match action.as_str() {
                "open" => DoorCommand::Open,
                "close" => DoorCommand::Close,
                other => anyhow::bail!("unknown action {other:?}, expected open or close"),
            };
            let mut actuator = SerialActuator::connect(
                &device,
                baud,
                Duration::from_secs(1),
                Duration::from_secs(2),
            )?;
            actuator.send(command)?;
            println!("sent {command:?} to {}", device.display());
        }
        Commands::CameraTest { device, frames } => {
            let mut feed = CameraFeed::open(&device)?;
            println!("feed open: {}x{}", feed.width(), feed.height());
            for i in 0..frames {
                match feed.read()? {
                    Some(frame) => println!(
                        "frame {i}: seq={} brightness={:.1}",
                        frame.sequence,
                        frame.avg_brightness()
                    ),
                    None => {
                        println!("feed ended early");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
