//! Append-only File Log
//!
//! One file per table per session, named `{table}-{session_id}.evlog`.
//!
//! ```text
//! offset  size  field
//! 0       4     magic  "IALG"
//! 4       1     format version tag
//! 5       1     record width
//! 6       1     event kind
//! 7       1     reserved (0)
//! 8       8     f64 LE reference epoch, unix seconds at time == 0
//! 16      ...   records, back to back
//! ```
//!
//! Appends go straight to the file, so a record counted as appended is in
//! the file even if a later sync fails. A write that stops inside a record
//! is cut back to the last whole record.

use super::{SinkError, StorageSink};
use crate::capture::types::EventKind;
use crate::codec::{negotiate, FormatParams, FormatVersion, RecordBytes, RECORD_WIDTH};
use crate::time::SessionClock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const MAGIC: [u8; 4] = *b"IALG";
pub const HEADER_LEN: usize = 16;
pub const LOG_EXTENSION: &str = "evlog";

/// Header at the start of every log file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogHeader {
    pub params: FormatParams,
    pub kind: EventKind,
    pub epoch_unix: f64,
}

impl LogHeader {
    /// Header for a file written by live capture
    pub fn current(kind: EventKind, epoch_unix: f64) -> Self {
        Self {
            params: FormatParams::from(FormatVersion::CURRENT),
            kind,
            epoch_unix,
        }
    }

    pub fn version(&self) -> FormatVersion {
        self.params.version
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = self.params.version.tag();
        out[5] = self.params.width as u8;
        out[6] = self.kind as u8;
        out[8..16].copy_from_slice(&self.epoch_unix.to_le_bytes());
        out
    }

    /// Parse and validate a header, negotiating its version tag against
    /// `declared` when the caller expects a specific version.
    pub fn parse(bytes: &[u8], declared: Option<FormatVersion>) -> Result<Self, SinkError> {
        if bytes.len() < HEADER_LEN {
            return Err(SinkError::Header(format!(
                "expected {} header bytes, found {}",
                HEADER_LEN,
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(SinkError::Header("bad magic".into()));
        }

        let params = negotiate(bytes[4], declared)?;
        let width = bytes[5] as usize;
        if width != params.width {
            return Err(crate::codec::CodecError::SizeMismatch {
                expected: params.width,
                actual: width,
            }
            .into());
        }
        let kind = EventKind::from_u8(bytes[6]).ok_or(crate::codec::CodecError::UnknownKind(bytes[6]))?;

        let mut epoch = [0u8; 8];
        epoch.copy_from_slice(&bytes[8..16]);

        Ok(Self {
            params,
            kind,
            epoch_unix: f64::from_le_bytes(epoch),
        })
    }
}

/// Name of the log file for `table` in session `session_id`
pub fn file_name(table: EventKind, session_id: &str) -> String {
    format!("{}-{}.{}", table.table_name(), session_id, LOG_EXTENSION)
}

/// Split a log file name back into its table and session id
pub fn parse_file_name(path: &Path) -> Option<(EventKind, String)> {
    if path.extension()? != LOG_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (table, session) = stem.split_once('-')?;
    Some((EventKind::from_table_name(table)?, session.to_string()))
}

struct TableFile {
    path: PathBuf,
    file: File,
    /// Bytes in the file, header included, always on a record boundary
    len: u64,
}

/// File-per-table storage sink
pub struct FileSink {
    dir: PathBuf,
    session_id: String,
    epoch_unix: f64,
    tables: [Option<TableFile>; 3],
    appended: [u64; 3],
    staging: Vec<u8>,
}

impl FileSink {
    /// Sink for a new session in `dir`, named and stamped from `clock`
    pub fn create(dir: impl Into<PathBuf>, clock: &SessionClock) -> Result<Self, SinkError> {
        Self::open(dir, clock.session_id(), clock.epoch_unix())
    }

    /// Sink for an explicit session. Files of an existing session are
    /// validated and appended to.
    pub fn open(dir: impl Into<PathBuf>, session_id: impl Into<String>, epoch_unix: f64) -> Result<Self, SinkError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let session_id = session_id.into();
        info!("Logging session {} to {}", session_id, dir.display());
        Ok(Self {
            dir,
            session_id,
            epoch_unix,
            tables: [None, None, None],
            appended: [0; 3],
            staging: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path_for(&self, table: EventKind) -> PathBuf {
        self.dir.join(file_name(table, &self.session_id))
    }

    /// Records appended to `table` through this sink
    pub fn appended(&self, table: EventKind) -> u64 {
        self.appended[table.index()]
    }

    fn table(&mut self, table: EventKind) -> Result<&mut TableFile, SinkError> {
        let slot = &mut self.tables[table.index()];
        if slot.is_none() {
            let path = self.dir.join(file_name(table, &self.session_id));
            let (file, len) = open_table_file(&path, table, self.epoch_unix)?;
            *slot = Some(TableFile { path, file, len });
        }
        slot.as_mut()
            .ok_or_else(|| SinkError::Unavailable(format!("{} table not open", table)))
    }
}

/// Open `path` for appending, writing a fresh header or validating the
/// existing one and cutting any torn tail. Returns the file and its length.
fn open_table_file(path: &Path, kind: EventKind, epoch_unix: f64) -> Result<(File, u64), SinkError> {
    let mut file = OpenOptions::new().read(true).append(true).create(true).open(path)?;
    let len = file.metadata()?.len();

    if len == 0 {
        file.write_all(&LogHeader::current(kind, epoch_unix).to_bytes())?;
        debug!("Created {}", path.display());
        return Ok((file, HEADER_LEN as u64));
    }

    let mut raw = [0u8; HEADER_LEN];
    file.read_exact(&mut raw)
        .map_err(|_| SinkError::Header(format!("{} is shorter than a header", path.display())))?;
    let header = LogHeader::parse(&raw, Some(FormatVersion::CURRENT))?;
    if header.kind != kind {
        return Err(SinkError::Header(format!(
            "{} holds {} records, not {}",
            path.display(),
            header.kind,
            kind
        )));
    }
    if header.epoch_unix != epoch_unix {
        warn!(
            "{} was started at epoch {:.3}, appending with epoch {:.3}",
            path.display(),
            header.epoch_unix,
            epoch_unix
        );
    }

    let body = len - HEADER_LEN as u64;
    let torn = body % RECORD_WIDTH as u64;
    if torn != 0 {
        warn!("Truncating {} torn bytes from {}", torn, path.display());
        file.set_len(len - torn)?;
    }
    info!(
        "Reopened {} ({} records)",
        path.display(),
        body / RECORD_WIDTH as u64
    );
    Ok((file, len - torn))
}

/// How far one write of a run of records got
#[derive(Debug)]
struct Appended {
    /// Whole records written
    records: usize,
    /// Bytes of a partial record after them
    torn: usize,
    /// What stopped the write early
    error: Option<io::Error>,
}

/// Write `bytes` (whole records back to back) until done or the first
/// error other than an interrupt.
fn append_records(out: &mut impl Write, bytes: &[u8]) -> Appended {
    let mut done = 0;
    let mut error = None;
    while done < bytes.len() {
        match out.write(&bytes[done..]) {
            Ok(0) => {
                error = Some(io::Error::new(io::ErrorKind::WriteZero, "file accepted no bytes"));
                break;
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }
    Appended {
        records: done / RECORD_WIDTH,
        torn: done % RECORD_WIDTH,
        error,
    }
}

impl StorageSink for FileSink {
    fn append_batch(&mut self, table: EventKind, records: &[RecordBytes]) -> Result<usize, SinkError> {
        let mut staging = std::mem::take(&mut self.staging);
        staging.clear();
        for record in records {
            staging.extend_from_slice(record);
        }
        let result = self.append_bytes(table, &staging, records.len());
        self.staging = staging;
        result
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for table in self.tables.iter_mut().flatten() {
            table.file.sync_data()?;
        }
        Ok(())
    }
}

impl FileSink {
    fn append_bytes(&mut self, table: EventKind, bytes: &[u8], count: usize) -> Result<usize, SinkError> {
        let file = self.table(table)?;
        let outcome = append_records(&mut file.file, bytes);
        file.len += (outcome.records * RECORD_WIDTH) as u64;

        if outcome.records > 0 {
            if let Some(e) = &outcome.error {
                warn!(
                    "Short append to {}: {} of {} records: {}",
                    file.path.display(),
                    outcome.records,
                    count,
                    e
                );
            }
        }

        let mut reopen = false;
        if outcome.torn > 0 {
            if let Err(e) = file.file.set_len(file.len) {
                // Reopening cuts the torn tail before the next append
                warn!("Could not cut torn record from {}: {}", file.path.display(), e);
                reopen = true;
            }
        }
        if reopen {
            self.tables[table.index()] = None;
        }
        self.appended[table.index()] += outcome.records as u64;

        match outcome.error {
            Some(e) if outcome.records == 0 => Err(e.into()),
            _ => Ok(outcome.records),
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush logs on close: {}", e);
        }
    }
}
