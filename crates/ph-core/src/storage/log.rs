use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom, Write as _};
use std::path::PathBuf;

use chrono::Utc;

use super::layout::DataDir;
use crate::error::CoreError;
use crate::model::{CommandRecord, Environment, EnvironmentId, RecordDraft, RecordId};

/// Append-only, per-environment command log stored as JSON lines.
///
/// Each append holds an exclusive lock on the log file for its duration, so
/// concurrent appenders to one environment are serialized and sequence
/// numbers stay dense. A line only counts once its trailing newline is on
/// disk; a torn tail left by a crash is invisible to readers and is cut off
/// by the next append.
#[derive(Debug, Clone)]
pub struct RecordStore {
    data: DataDir,
}

impl RecordStore {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    /// Append a record to the active environment and return its ID.
    pub fn append(
        &self,
        active: Option<&Environment>,
        draft: RecordDraft,
    ) -> Result<RecordId, CoreError> {
        self.append_record(active, draft).map(|r| r.id)
    }

    /// Append a record and return it as written.
    pub fn append_record(
        &self,
        active: Option<&Environment>,
        draft: RecordDraft,
    ) -> Result<CommandRecord, CoreError> {
        let env = active.ok_or_else(|| {
            CoreError::Validation("no active environment to record into".into())
        })?;
        if draft.command.trim().is_empty() {
            return Err(CoreError::Validation("command text is empty".into()));
        }

        fs::create_dir_all(self.data.env_dir(&env.id))?;
        let path = self.data.records_path(&env.id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
        let result = append_locked(&mut file, &env.id, draft);
        fs2::FileExt::unlock(&file).map_err(CoreError::Io)?;

        let record = result?;
        tracing::debug!(record = %record.id, "appended command record");
        Ok(record)
    }

    /// Records of an environment in capture order, optionally only those
    /// with `seq > since`.
    pub fn list(&self, environment: &EnvironmentId, since: Option<u64>) -> RecordIter {
        RecordIter {
            path: self.data.records_path(environment),
            since: since.unwrap_or(0),
            reader: None,
            done: false,
        }
    }

    /// Look up a single record.
    pub fn get(&self, id: &RecordId) -> Result<CommandRecord, CoreError> {
        let (env, seq) = id.parts()?;
        let not_found = || CoreError::NotFound { id: id.to_string() };
        if seq == 0 {
            return Err(not_found());
        }
        for record in self.list(&env, Some(seq - 1)) {
            let record = record?;
            if record.seq == seq {
                return Ok(record);
            }
            if record.seq > seq {
                break;
            }
        }
        Err(not_found())
    }

    /// Highest sequence number in the log, 0 when empty.
    pub fn last_seq(&self, environment: &EnvironmentId) -> Result<u64, CoreError> {
        let mut last = 0;
        for record in self.list(environment, None) {
            last = record?.seq;
        }
        Ok(last)
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data
    }
}

/// Bytes read per step when scanning the log backwards from its end.
const TAIL_CHUNK: u64 = 8 * 1024;

fn append_locked(
    file: &mut File,
    environment: &EnvironmentId,
    draft: RecordDraft,
) -> Result<CommandRecord, CoreError> {
    let len = file.metadata()?.len();
    let (complete_len, last_seq) = scan_tail(file, len)?;

    // Drop a torn tail so the new line starts on a boundary.
    if complete_len < len {
        tracing::warn!(
            environment = %environment,
            bytes = len - complete_len,
            "discarding incomplete trailing record"
        );
        file.set_len(complete_len)?;
    }

    let seq = last_seq + 1;

    let record = CommandRecord {
        id: RecordId::new(environment, seq),
        seq,
        command: draft.command,
        output: draft.output,
        cwd: draft.cwd,
        exit_code: draft.exit_code,
        duration_ms: draft.duration_ms,
        captured_at: Utc::now(),
    };

    let mut line = serde_json::to_vec(&record)?;
    line.push(b'\n');
    file.seek(SeekFrom::Start(complete_len))?;
    file.write_all(&line)?;
    file.sync_data()?;
    Ok(record)
}

/// Read backwards from `len` until the last complete record is found.
///
/// Returns the length of the log up to its last newline and the sequence
/// number of the newest record that parses (0 if none does).
fn scan_tail(file: &mut File, len: u64) -> Result<(u64, u64), CoreError> {
    let mut start = len;
    let mut tail: Vec<u8> = Vec::new();
    let mut complete_len = None;

    while start > 0 {
        let step = TAIL_CHUNK.min(start);
        start -= step;
        let mut chunk = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;

        let complete = match complete_len {
            Some(n) => n,
            None => match tail.iter().rposition(|&b| b == b'\n') {
                Some(i) => *complete_len.insert(start + i as u64 + 1),
                None => continue,
            },
        };

        let body = &tail[..(complete - start) as usize];
        let mut lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
        lines.pop();
        // The first line may be cut off until the scan reaches offset 0.
        let first = usize::from(start > 0);
        let newest = lines[first.min(lines.len())..]
            .iter()
            .rev()
            .find_map(|line| serde_json::from_slice::<CommandRecord>(line).ok());
        if let Some(record) = newest {
            return Ok((complete, record.seq));
        }
    }
    Ok((complete_len.unwrap_or(0), 0))
}

/// Lazy iterator over a command log. Finite; call [`RecordIter::restart`]
/// to read the log again from the beginning.
pub struct RecordIter {
    path: PathBuf,
    since: u64,
    reader: Option<BufReader<File>>,
    done: bool,
}

impl RecordIter {
    pub fn restart(&mut self) {
        self.reader = None;
        self.done = false;
    }
}

impl Iterator for RecordIter {
    type Item = Result<CommandRecord, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.reader.is_none() {
            match File::open(&self.path) {
                Ok(file) => self.reader = Some(BufReader::new(file)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        let reader = self.reader.as_mut()?;

        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) if line.last() != Some(&b'\n') => {
                    // Torn tail: not yet (or never) fully written.
                    self.done = true;
                    return None;
                }
                Ok(_) => match serde_json::from_slice::<CommandRecord>(&line) {
                    Ok(record) if record.seq > self.since => return Some(Ok(record)),
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), "skipping unreadable record: {e}");
                        continue;
                    }
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
