//! Follows a growing log file from a byte offset, surviving rotation.
//!
//! A worker thread polls the file: on each round it stats the path, detects
//! rotation (identity change or truncation), and reads every complete line
//! appended since the last round. Lines are handed to the consumer through a
//! bounded channel together with the offset just past them, so the consumer
//! always knows exactly how far it has read.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identity::FileIdentity;

/// Maximum number of lines read from the file in one polling round.
const MAX_LINES_PER_READ: usize = 10_000;

/// Lines buffered between the worker and the consumer.
const CHANNEL_CAPACITY: usize = 1_024;

/// Upper bound on how long the worker sleeps before rechecking the stop flag.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// One complete line read from the followed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailedLine {
    /// Line content without the trailing newline.
    pub text: String,
    /// Byte offset immediately after this line's newline.
    pub offset: u64,
    /// Identity of the physical file the line was read from.
    pub identity: FileIdentity,
}

enum TailItem {
    Line(TailedLine),
    Error(io::Error),
}

/// Cloneable request to stop a tailer, usable from another thread.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reads the complete lines appended since the last poll.
///
/// The followed file stays open between polls. When the path starts to
/// refer to another file, the held handle is read to EOF before switching,
/// so lines written just before a rename are still delivered.
struct FileFollower {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    identity: FileIdentity,
    /// Bytes of a line whose newline has not been written yet.
    partial: Vec<u8>,
}

impl FileFollower {
    /// Opens `path` at `start_offset`. An offset past the end of the file is
    /// treated as truncation and reading starts at 0.
    fn open(path: PathBuf, start_offset: u64) -> io::Result<Self> {
        let mut file = File::open(&path)?;
        let metadata = file.metadata()?;
        let offset = if start_offset > metadata.len() {
            warn!(
                path = %path.display(),
                start_offset,
                size = metadata.len(),
                "stored offset is past end of file, reading from start"
            );
            0
        } else {
            start_offset
        };
        file.seek(SeekFrom::Start(offset))?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset,
            identity: FileIdentity::from_metadata(&metadata),
            partial: Vec::new(),
        })
    }

    fn read_new_lines(&mut self) -> io::Result<Vec<TailedLine>> {
        let mut lines = Vec::new();

        if let Err(e) = self.drain(&mut lines) {
            return keep_delivered(lines, e);
        }
        if lines.len() >= MAX_LINES_PER_READ {
            return Ok(lines);
        }

        match self.reopen_if_rotated() {
            Ok(true) => {
                if let Err(e) = self.drain(&mut lines) {
                    return keep_delivered(lines, e);
                }
            }
            Ok(false) => {}
            Err(e) => return keep_delivered(lines, e),
        }

        Ok(lines)
    }

    /// Reads complete lines from the held handle up to EOF.
    fn drain(&mut self, lines: &mut Vec<TailedLine>) -> io::Result<()> {
        while lines.len() < MAX_LINES_PER_READ {
            let n = self.reader.read_until(b'\n', &mut self.partial)?;
            // EOF, or a line still being written: keep it for the next poll.
            if n == 0 || self.partial.last() != Some(&b'\n') {
                break;
            }
            self.offset += self.partial.len() as u64;

            let mut text = std::mem::take(&mut self.partial);
            text.pop();
            if text.last() == Some(&b'\r') {
                text.pop();
            }
            lines.push(TailedLine {
                text: String::from_utf8_lossy(&text).into_owned(),
                offset: self.offset,
                identity: self.identity,
            });
        }
        Ok(())
    }

    /// Switches to the start of the file now at `path` if it was replaced
    /// or truncated. Returns whether the position moved.
    fn reopen_if_rotated(&mut self) -> io::Result<bool> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            // Rotation in progress, keep the old file until the new one exists.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        if FileIdentity::from_metadata(&metadata) != self.identity {
            let file = File::open(&self.path)?;
            // The path may have been swapped again between stat and open.
            let identity = FileIdentity::from_metadata(&file.metadata()?);
            info!(
                path = %self.path.display(),
                old_offset = self.offset,
                "input log rotated, reading new file from start"
            );
            self.reader = BufReader::new(file);
            self.identity = identity;
        } else if metadata.len() < self.offset {
            info!(
                path = %self.path.display(),
                old_offset = self.offset,
                "input log truncated, reading from start"
            );
            self.reader.seek(SeekFrom::Start(0))?;
        } else {
            return Ok(false);
        }

        if !self.partial.is_empty() {
            debug!(
                bytes = self.partial.len(),
                "discarding unterminated last line of previous file"
            );
            self.partial.clear();
        }
        self.offset = 0;
        Ok(true)
    }

    fn run(mut self, tx: SyncSender<TailItem>, stop: StopToken, poll_interval: Duration) {
        while !stop.is_stopped() {
            match self.read_new_lines() {
                Ok(lines) if !lines.is_empty() => {
                    for line in lines {
                        if tx.send(TailItem::Line(line)).is_err() {
                            return;
                        }
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    if tx.send(TailItem::Error(e)).is_err() {
                        return;
                    }
                }
            }
            sleep_unless_stopped(poll_interval, &stop);
        }
    }
}

fn sleep_unless_stopped(duration: Duration, stop: &StopToken) {
    let mut remaining = duration;
    while remaining > Duration::ZERO && !stop.is_stopped() {
        let sleep_time = remaining.min(STOP_CHECK_INTERVAL);
        thread::sleep(sleep_time);
        remaining = remaining.saturating_sub(sleep_time);
    }
}

/// Lines already read have advanced the offset, so they are delivered and
/// the error is left for the next poll to hit again.
fn keep_delivered(lines: Vec<TailedLine>, e: io::Error) -> io::Result<Vec<TailedLine>> {
    if lines.is_empty() {
        return Err(e);
    }
    warn!(error = %e, "read interrupted, delivering {} lines read so far", lines.len());
    Ok(lines)
}

/// Live tail of one input file, owned by a single engine generation.
pub struct LineTailer {
    path: PathBuf,
    offset: u64,
    identity: FileIdentity,
    rx: Option<Receiver<TailItem>>,
    stop: StopToken,
    worker: Option<JoinHandle<()>>,
}

impl LineTailer {
    /// Starts following `path` from `start_offset`.
    ///
    /// Fails only when the file cannot be opened at all.
    pub fn open(path: impl Into<PathBuf>, start_offset: u64, poll_interval: Duration) -> Result<Self> {
        let path = path.into();
        let follower =
            FileFollower::open(path.clone(), start_offset).map_err(|source| Error::TailOpen {
                path: path.clone(),
                source,
            })?;
        let offset = follower.offset;
        let identity = follower.identity;

        let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
        let stop = StopToken::default();
        let worker_stop = stop.clone();
        let worker = thread::Builder::new()
            .name("logsep-tail".into())
            .spawn(move || follower.run(tx, worker_stop, poll_interval))
            .map_err(|source| Error::Spawn {
                name: "tail",
                source,
            })?;

        debug!(path = %path.display(), offset, %identity, "tailing started");

        Ok(Self {
            path,
            offset,
            identity,
            rx: Some(rx),
            stop,
            worker: Some(worker),
        })
    }

    /// Offset immediately after the most recently delivered line.
    pub fn current_offset(&self) -> u64 {
        self.offset
    }

    /// Identity of the file the most recently delivered line came from.
    pub fn current_identity(&self) -> FileIdentity {
        self.identity
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Blocking stream of lines; ends only once the tailer is stopped.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { tailer: self }
    }

    /// Stops the worker and waits for it to exit. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.stop();
        // Dropping the receiver unblocks a worker waiting on a full channel.
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(path = %self.path.display(), "tail worker panicked");
            }
            debug!(path = %self.path.display(), "tailer stopped");
        }
    }
}

impl Drop for LineTailer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Iterator returned by [`LineTailer::lines`].
pub struct Lines<'a> {
    tailer: &'a mut LineTailer,
}

impl Iterator for Lines<'_> {
    type Item = Result<TailedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tailer.stop.is_stopped() {
            return None;
        }
        match self.tailer.rx.as_ref()?.recv().ok()? {
            TailItem::Line(line) => {
                self.tailer.offset = line.offset;
                self.tailer.identity = line.identity;
                Some(Ok(line))
            }
            TailItem::Error(source) => Some(Err(Error::TailRead {
                path: self.tailer.path.clone(),
                source,
            })),
        }
    }
}
