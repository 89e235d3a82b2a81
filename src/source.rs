//! One open input: separator-based item extraction, rotation/truncation detection.

use crate::rule::Rule;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Soft threshold past which an accumulating carry buffer is warned about.
const TRASH_HOLD_SIZE: usize = 2048;
/// Hard threshold past which the carry is abandoned and an error is reported.
const MAX_LOG_ITEM_SIZE: usize = 4096;
/// Size of each non-blocking read into the scratch buffer.
const READ_BUF_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Regular,
    Fifo,
    /// Accepted in configuration but not actually monitorable.
    Socket,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("log source {0:?} is not open")]
    NotOpen,
    #[error("log item exceeded the {MAX_LOG_ITEM_SIZE} byte limit; check separator settings")]
    ItemTooLong,
    #[error("unsupported source kind: sockets are accepted in configuration but not monitorable")]
    UnsupportedKind,
    #[error("monitored path does not exist: {0}")]
    MissingRegularFile(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Expands `\n` and `\r` escapes in a user-supplied separator string into raw bytes.
pub fn expand_separator(raw: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') => {
                    chars.next();
                    out.push(b'\n');
                    continue;
                }
                Some('r') => {
                    chars.next();
                    out.push(b'\r');
                    continue;
                }
                _ => {}
            }
        }
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
    }
    out
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub struct LogSource {
    pub path: PathBuf,
    pub directory: PathBuf,
    pub name: String,
    pub kind: SourceKind,
    pub separator: Vec<u8>,
    file: Option<File>,
    carry: Vec<u8>,
    rules: Vec<Arc<Rule>>,
}

impl LogSource {
    pub fn new(path: PathBuf, kind: SourceKind, separator: Vec<u8>) -> Self {
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            directory,
            name,
            kind,
            separator,
            file: None,
            carry: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn attached_rules(&mut self) -> &mut Vec<Arc<Rule>> {
        &mut self.rules
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Opens the source. Creates the FIFO if it's missing and `kind == Fifo`; a missing regular
    /// file is an error. Always opens non-blocking; optionally seeks to end so pre-existing
    /// content is not replayed.
    pub fn open(&mut self, seek_to_end: bool) -> Result<(), SourceError> {
        match self.kind {
            SourceKind::Socket => return Err(SourceError::UnsupportedKind),
            SourceKind::Fifo => {
                if !self.path.exists() {
                    let c_path = std::ffi::CString::new(self.path.as_os_str().as_encoded_bytes())
                        .map_err(|_| SourceError::MissingRegularFile(self.path.clone()))?;
                    // SAFETY: c_path is a valid NUL-terminated path; 0o644 is a plain mode bitmask.
                    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
                    if rc != 0 {
                        return Err(SourceError::Io(io::Error::last_os_error()));
                    }
                }
            }
            SourceKind::Regular => {
                if !self.path.exists() {
                    return Err(SourceError::MissingRegularFile(self.path.clone()));
                }
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)?;
        if seek_to_end {
            file.seek(SeekFrom::End(0))?;
        }
        self.file = Some(file);
        self.carry.clear();
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn reopen(&mut self, seek_to_end: bool) -> Result<(), SourceError> {
        self.close();
        self.open(seek_to_end)
    }

    pub fn position(&mut self) -> u64 {
        match self.file.as_mut() {
            Some(f) => f.stream_position().unwrap_or(0),
            None => 0,
        }
    }

    /// If the on-disk size is strictly below the current offset, reposition to end-of-file
    /// without replaying any content (handles truncate-in-place rotation).
    pub fn handle_if_truncated(&mut self) -> Result<(), SourceError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let on_disk_size = file.metadata()?.len();
        let offset = file.stream_position()?;
        if on_disk_size < offset {
            tracing::info!(source = %self.name, on_disk_size, offset, "source truncated; repositioning to end");
            file.seek(SeekFrom::End(0))?;
            self.carry.clear();
        }
        Ok(())
    }

    /// Extracts one complete item, or `Ok(None)` if no complete item is available right now.
    ///
    /// Scans the carry buffer for the separator first; failing that, reads a page at a time
    /// (retrying on transient would-block conditions), checking each page for the separator
    /// before appending it to the carry and reading again. A chunk whose very first byte is a
    /// NUL — the signature of a sparse/zero-filled log growth rather than real content — flushes
    /// whatever is in the carry as an item, matching the original engine's handling of that case.
    pub fn fetch_next(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        let fd = self.file.as_ref().ok_or(SourceError::NotOpen)?.as_raw_fd();

        if let Some(pos) = find_subslice(&self.carry, &self.separator) {
            let item = self.carry[..pos].to_vec();
            self.carry.drain(..pos + self.separator.len());
            return Ok(Some(item));
        }

        loop {
            if self.carry.len() > TRASH_HOLD_SIZE {
                tracing::warn!(source = %self.name, len = self.carry.len(), "log item seems too long; check separator settings");
            }
            if self.carry.len() > MAX_LOG_ITEM_SIZE {
                tracing::error!(source = %self.name, "log item exceeded length limit; check separator settings");
                self.carry.clear();
                return Err(SourceError::ItemTooLong);
            }

            let mut buf = [0u8; READ_BUF_SIZE];
            let n = loop {
                match read_raw(fd, &mut buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::error!(source = %self.name, error = %e, "failed to read log source");
                        return Err(SourceError::Io(e));
                    }
                }
            };

            if n == 0 {
                return Ok(None);
            }

            if buf[0] == 0 {
                let item = std::mem::take(&mut self.carry);
                return Ok(Some(item));
            }

            if let Some(pos) = find_subslice(&buf[..n], &self.separator) {
                let mut item = std::mem::take(&mut self.carry);
                item.extend_from_slice(&buf[..pos]);
                self.carry = buf[pos + self.separator.len()..n].to_vec();
                return Ok(Some(item));
            }

            self.carry.extend_from_slice(&buf[..n]);
        }
    }
}

fn read_raw(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: fd is a valid, open file descriptor owned by this LogSource's File; buf is a
    // correctly-sized, writable slice.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
