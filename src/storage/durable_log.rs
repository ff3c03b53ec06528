//! Append-only spool of length-prefixed records.
//!
//! On disk the log is nothing but a sequence of frames:
//!
//! ```text
//! ┌──────────────┬────────────────────┐┌──────────────┬─────────
//! │ len: u16 LE  │ payload (len bytes)││ len: u16 LE  │ ...
//! └──────────────┴────────────────────┘└──────────────┴─────────
//! ```
//!
//! There is no header. The read offset, i.e. how many bytes have already been
//! handed back to the caller, lives next to the log in `<path>.offset` as an
//! 8-byte little-endian integer. Once the offset grows past the compaction
//! threshold the consumed prefix is dropped by rewriting the file.
//!
//! A frame cut short by a crash mid-write is cut off when the log is opened,
//! so new frames are always appended on a frame boundary.
//!
//! A frame that fails to decode is treated as corruption of the whole backlog:
//! the log is emptied and the offset reset rather than attempting a repair.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::record::{encode_frame, Record};

/// Consumed bytes tolerated before the log is compacted.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1024 * 1024;

const FRAME_HEADER_LEN: u64 = 2;

pub struct DurableLog<R> {
    path: PathBuf,
    offset_path: PathBuf,
    file: Option<File>,
    offset: u64,
    compact_threshold: u64,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> DurableLog<R> {
    pub fn new<P: AsRef<Path>>(path: P, compact_threshold: u64) -> Self {
        let path = path.as_ref().to_path_buf();
        let offset_path = sidecar_path(&path, ".offset");
        Self {
            path,
            offset_path,
            file: None,
            offset: 0,
            compact_threshold,
            _record: PhantomData,
        }
    }

    /// Opens (creating if needed) the log and restores the persisted offset.
    pub fn open(&mut self) -> Result<(), StorageError> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = open_rw(&self.path)?;
        let mut len = file.metadata()?.len();
        let offset = self.read_persisted_offset();
        self.offset = if offset > len {
            warn!(
                "Persisted offset {} is past the end of {} ({} bytes), starting from 0",
                offset,
                self.path.display(),
                len
            );
            0
        } else {
            offset
        };
        let complete = complete_frames_end(&mut file, self.offset, len)?;
        if complete < len {
            warn!(
                "Dropping {} byte(s) of torn frame at the end of {}",
                len - complete,
                self.path.display()
            );
            file.set_len(complete)?;
            len = complete;
        }
        self.file = Some(file);
        info!(
            "Opened durable log {} (size={}, offset={})",
            self.path.display(),
            len,
            self.offset
        );
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
            debug!("Closed durable log {}", self.path.display());
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written but not yet handed out by [`load`](Self::load).
    pub fn pending_bytes(&self) -> Result<u64, StorageError> {
        let file = self.file.as_ref().ok_or(StorageError::NotOpen)?;
        Ok(file.metadata()?.len().saturating_sub(self.offset))
    }

    /// Appends `records` in order, flushing once at the end.
    ///
    /// Records that cannot be encoded or do not fit in a frame are logged and
    /// skipped; they never make it to disk.
    pub fn store(&mut self, records: &[R]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(StorageError::NotOpen)?;
        let start = file.seek(SeekFrom::End(0))?;
        let outcome = {
            let mut writer = BufWriter::new(&mut *file);
            match write_frames(&mut writer, records) {
                Ok(n) => writer.flush().map(|_| n).map_err(StorageError::from),
                Err(e) => Err(e),
            }
        };
        let written = match outcome {
            Ok(n) => n,
            Err(e) => {
                // keep later appends frame-aligned
                if let Err(undo) = file.set_len(start) {
                    warn!("Failed to roll back partial write to {}: {}", self.path.display(), undo);
                }
                return Err(e);
            }
        };
        debug!(
            "Stored {}/{} record(s) in {}",
            written,
            records.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Reads up to `max` records starting at the current offset.
    ///
    /// A truncated trailing frame ends the read and stays on disk. A frame
    /// whose payload does not decode empties the whole log; the records
    /// decoded before it are still returned.
    pub fn load(&mut self, max: usize) -> Result<Vec<R>, StorageError> {
        let mut records = Vec::new();
        if max == 0 {
            return Ok(records);
        }
        let file = self.file.as_mut().ok_or(StorageError::NotOpen)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let mut reader = BufReader::new(&mut *file);
        let mut consumed = 0u64;
        let mut corrupted = false;

        while records.len() < max {
            let payload = match read_frame(&mut reader)? {
                Some(payload) => payload,
                None => break,
            };
            match R::decode(&payload) {
                Ok(record) => {
                    consumed += FRAME_HEADER_LEN + payload.len() as u64;
                    records.push(record);
                }
                Err(e) => {
                    warn!(
                        "Corrupted frame at offset {} in {}: {}; discarding backlog",
                        self.offset + consumed,
                        self.path.display(),
                        e
                    );
                    corrupted = true;
                    break;
                }
            }
        }
        drop(reader);

        if corrupted {
            self.reset()?;
            return Ok(records);
        }

        if consumed > 0 {
            self.offset += consumed;
            self.persist_offset();
            debug!(
                "Loaded {} record(s) from {} (offset={})",
                records.len(),
                self.path.display(),
                self.offset
            );
        }

        if self.offset > self.compact_threshold {
            if let Err(e) = self.compact(&[], &[]) {
                warn!("Compaction of {} failed, retrying later: {}", self.path.display(), e);
            }
        }
        Ok(records)
    }

    /// Rewrites the log as `before` + unread tail + `after` and resets the
    /// offset to 0.
    ///
    /// The new content is written to a temporary file and renamed over the
    /// log, so a crash mid-compaction leaves the old log intact.
    pub fn compact(&mut self, before: &[R], after: &[R]) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or(StorageError::NotOpen)?;
        let len = file.metadata()?.len();
        let keep_from = self.offset.min(len);
        let mut tail = Vec::with_capacity((len - keep_from) as usize);
        file.seek(SeekFrom::Start(keep_from))?;
        file.read_to_end(&mut tail)?;

        let tmp_path = sidecar_path(&self.path, ".compact");
        if let Err(e) = write_compacted(&tmp_path, before, &tail, after) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &self.path)?;

        // the old handle points at the replaced file
        self.offset = 0;
        self.persist_offset();
        self.file = None;
        self.file = Some(open_rw(&self.path)?);

        info!(
            "Compacted {}: dropped {} consumed byte(s), kept {}, spliced {} before / {} after",
            self.path.display(),
            keep_from,
            tail.len(),
            before.len(),
            after.len()
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StorageError> {
        let file = self.file.as_mut().ok_or(StorageError::NotOpen)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        self.persist_offset();
        Ok(())
    }

    fn read_persisted_offset(&self) -> u64 {
        match fs::read(&self.offset_path) {
            Ok(bytes) => match <[u8; 8]>::try_from(bytes.as_slice()) {
                Ok(raw) => u64::from_le_bytes(raw),
                Err(_) => {
                    warn!("Ignoring malformed offset file {}", self.offset_path.display());
                    0
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!("Failed to read offset file {}: {}", self.offset_path.display(), e);
                0
            }
        }
    }

    fn persist_offset(&self) {
        if let Err(e) = fs::write(&self.offset_path, self.offset.to_le_bytes()) {
            warn!(
                "Failed to persist offset {} to {}: {}",
                self.offset,
                self.offset_path.display(),
                e
            );
        }
    }
}

fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

fn write_frames<W: Write, R: Record>(writer: &mut W, records: &[R]) -> Result<usize, StorageError> {
    let mut written = 0;
    for record in records {
        let payload = match encode_frame(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping record: {}", e);
                continue;
            }
        };
        writer.write_all(&(payload.len() as u16).to_le_bytes())?;
        writer.write_all(&payload)?;
        written += 1;
    }
    Ok(written)
}

fn write_compacted<R: Record>(
    path: &Path,
    before: &[R],
    tail: &[u8],
    after: &[R],
) -> Result<(), StorageError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_frames(&mut writer, before)?;
    writer.write_all(tail)?;
    write_frames(&mut writer, after)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Position just past the last complete frame at or after `from`.
fn complete_frames_end(file: &mut File, from: u64, len: u64) -> io::Result<u64> {
    let mut reader = BufReader::new(&mut *file);
    reader.seek(SeekFrom::Start(from))?;
    let mut pos = from;
    let mut header = [0u8; 2];
    while pos + FRAME_HEADER_LEN <= len {
        reader.read_exact(&mut header)?;
        let frame_len = FRAME_HEADER_LEN + u16::from_le_bytes(header) as u64;
        if pos + frame_len > len {
            break;
        }
        reader.seek_relative((frame_len - FRAME_HEADER_LEN) as i64)?;
        pos += frame_len;
    }
    Ok(pos)
}

/// Reads one frame. `Ok(None)` means end of stream, including a frame cut
/// short by EOF.
fn read_frame<Rd: Read>(reader: &mut Rd) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u16::from_le_bytes(header) as usize;
    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}
