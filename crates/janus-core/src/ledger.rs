//! Append-only, date-partitioned attendance store.
//!
//! One CSV file per calendar date. Duplicates are suppressed twice:
//! an in-session set makes `record_if_absent` O(1) with no disk I/O,
//! and `flush` re-checks the on-disk partition once before appending
//! so repeated runs on the same day stay duplicate-free.

use chrono::{NaiveDate, NaiveTime};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FMT: &str = "%d-%m-%Y";
const TIME_FMT: &str = "%I:%M:%S %p";
const PARTITION_HEADER: [&str; 4] = ["ExternalId", "Name", "Date", "Time"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("attendance partition unreadable: {0}")]
    Csv(#[from] csv::Error),
}

/// One accepted recognition, first time that identity was seen on
/// that date. Never mutated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub external_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyPresent,
}

/// In-session attendance buffer over a partition directory.
pub struct AttendanceLedger {
    dir: PathBuf,
    seen: HashSet<(String, NaiveDate)>,
    /// First-recognition order, preserved through flush.
    pending: Vec<AttendanceRecord>,
    #[cfg(test)]
    fail_next_appends: std::cell::Cell<usize>,
}

impl AttendanceLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashSet::new(),
            pending: Vec::new(),
            #[cfg(test)]
            fail_next_appends: std::cell::Cell::new(0),
        }
    }

    /// Record an accepted recognition unless this identity was
    /// already seen today. Consults only the in-session set; the disk
    /// is checked once, at flush.
    pub fn record_if_absent(
        &mut self,
        external_id: &str,
        name: &str,
        date: NaiveDate,
        time: NaiveTime,
    ) -> RecordOutcome {
        let key = (external_id.to_string(), date);
        if self.seen.contains(&key) {
            return RecordOutcome::AlreadyPresent;
        }
        self.seen.insert(key);
        self.pending.push(AttendanceRecord {
            external_id: external_id.to_string(),
            name: name.to_string(),
            date,
            time,
        });
        RecordOutcome::Recorded
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Distinct dates with pending records, oldest first. A session
    /// that crosses midnight holds records for more than one date.
    pub fn pending_dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.pending.iter().map(|r| r.date).collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }

    /// Partition file for a date: `Attendance_<DD-MM-YYYY>.csv`.
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        partition_path(&self.dir, date)
    }

    /// Append every pending record for `date` that the on-disk
    /// partition does not already hold, in first-recognition order.
    ///
    /// A failed append is retried once. If the retry also fails the
    /// error is returned and every pending record stays in memory for
    /// a later attempt. Returns the number of rows appended.
    pub fn flush(&mut self, date: NaiveDate) -> Result<usize, LedgerError> {
        let batch: Vec<AttendanceRecord> = self
            .pending
            .iter()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let appended = match self.append_missing(date, &batch) {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "attendance flush failed; retrying once");
                self.append_missing(date, &batch)?
            }
        };

        self.pending.retain(|r| r.date != date);
        tracing::info!(
            date = %date.format(DATE_FMT),
            appended,
            skipped = batch.len() - appended,
            "attendance flushed"
        );
        Ok(appended)
    }

    fn append_missing(
        &self,
        date: NaiveDate,
        batch: &[AttendanceRecord],
    ) -> Result<usize, LedgerError> {
        #[cfg(test)]
        {
            let remaining = self.fail_next_appends.get();
            if remaining > 0 {
                self.fail_next_appends.set(remaining - 1);
                return Err(std::io::Error::other("injected append failure").into());
            }
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.partition_path(date);

        // One read of the partition makes the merge idempotent across
        // repeated runs and across the internal retry.
        let on_disk: HashSet<(String, NaiveDate)> = read_partition(&self.dir, date)?
            .into_iter()
            .map(|r| (r.external_id, r.date))
            .collect();

        // A zero-length partition (created but never written) still
        // needs the header, or its first data row would be read back
        // as one.
        let is_new = match std::fs::metadata(&path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(PARTITION_HEADER)?;
        }

        let mut appended = 0usize;
        for record in batch {
            if on_disk.contains(&(record.external_id.clone(), record.date)) {
                continue;
            }
            writer.write_record([
                record.external_id.as_str(),
                record.name.as_str(),
                &record.date.format(DATE_FMT).to_string(),
                &record.time.format(TIME_FMT).to_string(),
            ])?;
            appended += 1;
        }
        writer.flush()?;
        Ok(appended)
    }
}

fn partition_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("Attendance_{}.csv", date.format(DATE_FMT)))
}

/// Read one partition back, in file order. A missing partition is an
/// empty day, not an error. Short rows are skipped with a warning.
pub fn read_partition(dir: &Path, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let path = partition_path(dir, date);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&path)?;
    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let (Some(external_id), Some(name), Some(date_str), Some(time_str)) =
            (record.get(0), record.get(1), record.get(2), record.get(3))
        else {
            tracing::warn!(path = %path.display(), row = row + 2, "short attendance row skipped");
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date_str, DATE_FMT) else {
            tracing::warn!(path = %path.display(), row = row + 2, "bad date in attendance row");
            continue;
        };
        let Ok(time) = NaiveTime::parse_from_str(time_str, TIME_FMT) else {
            tracing::warn!(path = %path.display(), row = row + 2, "bad time in attendance row");
            continue;
        };
        records.push(AttendanceRecord {
            external_id: external_id.to_string(),
            name: name.to_string(),
            date,
            time,
        });
    }
    Ok(records)
}
