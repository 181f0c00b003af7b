//! Read-only identity lookup, built from the roster CSV.
//!
//! The roster is loaded fresh at every session start — enrollment may
//! have changed it between runs — and never written by this crate.

use crate::types::Identity;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Required roster header, in order.
const ROSTER_COLUMNS: [&str; 3] = ["SerialNo", "ExternalId", "Name"];

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("roster not found: {0}")]
    NotFound(String),
    #[error("roster has no data rows: {0}")]
    Empty(String),
    #[error("roster missing required column {column:?}")]
    MissingColumn { column: String },
    #[error("roster row {row} is malformed: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("duplicate serial {serial_id} in roster")]
    DuplicateSerial { serial_id: u32 },
    #[error("roster read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("roster parse failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Immutable serial-to-identity map for one session.
#[derive(Debug)]
pub struct IdentityDirectory {
    by_serial: HashMap<u32, Identity>,
}

impl IdentityDirectory {
    /// Load the roster from `path`.
    ///
    /// Fails if the file is absent, has no data rows, lacks one of
    /// the `SerialNo,ExternalId,Name` columns, or contains a row
    /// whose serial is missing, non-numeric, or already seen.
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        if !path.exists() {
            return Err(DirectoryError::NotFound(path.display().to_string()));
        }

        let mut reader = csv::Reader::from_path(path)?;

        let headers = reader.headers()?.clone();
        let mut column_idx = [0usize; 3];
        for (i, wanted) in ROSTER_COLUMNS.iter().enumerate() {
            column_idx[i] = headers
                .iter()
                .position(|h| h.trim() == *wanted)
                .ok_or_else(|| DirectoryError::MissingColumn {
                    column: wanted.to_string(),
                })?;
        }
        let [serial_idx, external_idx, name_idx] = column_idx;

        let mut by_serial = HashMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let field = |idx: usize| -> Result<&str, DirectoryError> {
                record
                    .get(idx)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| DirectoryError::MalformedRow {
                        row: row + 2, // 1-based, counting the header line
                        reason: "missing field".into(),
                    })
            };

            let serial_id: u32 =
                field(serial_idx)?
                    .parse()
                    .map_err(|_| DirectoryError::MalformedRow {
                        row: row + 2,
                        reason: "serial is not an integer".into(),
                    })?;
            let identity = Identity {
                serial_id,
                external_id: field(external_idx)?.to_string(),
                name: field(name_idx)?.to_string(),
            };

            if by_serial.insert(serial_id, identity).is_some() {
                return Err(DirectoryError::DuplicateSerial { serial_id });
            }
        }

        if by_serial.is_empty() {
            return Err(DirectoryError::Empty(path.display().to_string()));
        }

        tracing::info!(
            path = %path.display(),
            identities = by_serial.len(),
            "roster loaded"
        );

        Ok(Self { by_serial })
    }

    /// Resolve a matcher serial to its roster identity.
    pub fn lookup(&self, serial_id: u32) -> Option<&Identity> {
        self.by_serial.get(&serial_id)
    }

    pub fn len(&self) -> usize {
        self.by_serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_serial.is_empty()
    }

    /// All identities, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.by_serial.values()
    }
}
