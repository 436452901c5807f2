use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame overhead per record: length prefix + CRC trailer.
const FRAME_BYTES: u64 = 8;

/// Larger length prefixes can only come from corruption.
const MAX_RECORD_BYTES: usize = 64 * 1024 * 1024;

/// Encode a single event to `[len][bincode][crc32]`. Returns the frame size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(len as u64 + FRAME_BYTES)
}

/// Read exactly `buf.len()` bytes. `Ok(false)` on a clean or torn EOF.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record, or `None` at end of log / first damaged record.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_frame_part(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_BYTES {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_frame_part(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_frame_part(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, len as u64 + FRAME_BYTES))),
        Err(_) => Ok(None),
    }
}

/// Result of reading a log back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
    /// Bytes after the intact prefix (torn write or corruption).
    pub discarded_bytes: u64,
}

/// Position of the log at a commit boundary, for `rollback`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalMark {
    len: u64,
    appends: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalStats {
    pub appends_since_compact: u64,
    /// Successful fsyncs since open.
    pub flushes: u64,
}

/// Append-only write-ahead log of store events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// Replay stops at the first torn or corrupt entry; `open` cuts the file back
/// to the intact prefix so later appends stay reachable.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes in the log once the buffer is flushed.
    len: u64,
    appends_since_compact: u64,
    flushes: u64,
    /// Set when a rollback could not restore the last commit boundary.
    /// Every later append fails until the log is reopened.
    poisoned: bool,
    #[cfg(test)]
    fail_after: Option<usize>,
}

impl Wal {
    /// Open (or create) the log at `path`, truncating any damaged tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_replayed(path).map(|(wal, _)| wal)
    }

    /// Like `open`, also returning the intact events already in the log.
    pub fn open_replayed(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if replay.discarded_bytes > 0 {
            tracing::warn!(
                "discarding {} damaged bytes at end of {}",
                replay.discarded_bytes,
                path.display()
            );
            file.set_len(replay.valid_len)?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            len: replay.valid_len,
            appends_since_compact: replay.events.len() as u64,
            flushes: 0,
            poisoned: false,
            #[cfg(test)]
            fail_after: None,
        };
        Ok((wal, replay.events))
    }

    /// Append one event and fsync. Production code batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event without flushing. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL tail is damaged; reopen to recover"));
        }
        #[cfg(test)]
        if let Some(left) = self.fail_after.as_mut() {
            if *left == 0 {
                self.fail_after = None;
                // Half a frame, as a failing disk would leave it
                self.writer.write_all(&[0xAB; 5])?;
                return Err(io::Error::other("injected append failure"));
            }
            *left -= 1;
        }
        self.len += encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.flushes += 1;
        Ok(())
    }

    /// Current commit boundary. Take it before buffering a batch.
    pub fn mark(&self) -> WalMark {
        WalMark {
            len: self.len,
            appends: self.appends_since_compact,
        }
    }

    /// Throw away everything written or buffered since `mark`, on disk too.
    pub fn rollback(&mut self, mark: WalMark) -> io::Result<()> {
        let result = self.truncate_to(mark);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn truncate_to(&mut self, mark: WalMark) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Discard, don't flush, whatever the old writer still buffers
        let _ = stale.into_parts();
        self.writer.get_ref().set_len(mark.len)?;
        self.writer.get_ref().sync_all()?;
        self.len = mark.len;
        self.appends_since_compact = mark.appends;
        Ok(())
    }

    pub fn stats(&self) -> WalStats {
        WalStats {
            appends_since_compact: self.appends_since_compact,
            flushes: self.flushes,
        }
    }

    #[cfg(test)]
    pub(crate) fn fail_after_appends(&mut self, appends: usize) {
        self.fail_after = Some(appends);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written since open or the last compaction (replayed ones included).
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a sibling temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut len = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                len += encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        self.writer.flush()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.len = len;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Read the log from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let total_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        while let Some((event, frame_len)) = decode_next(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += frame_len;
        }
        replay.discarded_bytes = total_len - replay.valid_len;
        Ok(replay)
    }
}
