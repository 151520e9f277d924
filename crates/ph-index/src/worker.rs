use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ph_core::env::PendingWrites;
use ph_core::error::CoreError;
use ph_core::model::{CommandRecord, EnvironmentId};
use ph_core::PhConfig;

use crate::error::IndexError;
use crate::search::SearchEngine;

enum Job {
    Index(CommandRecord),
    Flush(SyncSender<Result<(), String>>),
    Shutdown,
}

/// Background indexer fed through a bounded queue.
///
/// Records are batched until `flush_interval` has passed since the first
/// pending one or `batch_size` is reached. [`IndexWorker::submit`] blocks
/// while the queue is full.
pub struct IndexWorker {
    tx: SyncSender<Job>,
    handle: Option<JoinHandle<()>>,
}

impl IndexWorker {
    pub fn spawn(engine: Arc<SearchEngine>, config: &PhConfig) -> Result<Self, IndexError> {
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let interval = config.flush_interval;
        let batch_size = config.batch_size;
        let handle = std::thread::Builder::new()
            .name("ph-indexer".into())
            .spawn(move || run(engine, rx, interval, batch_size))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Queue a record for indexing.
    pub fn submit(&self, record: CommandRecord) -> Result<(), IndexError> {
        self.tx
            .send(Job::Index(record))
            .map_err(|_| IndexError::WorkerStopped)
    }

    /// Block until every record submitted so far is durable in its index.
    pub fn flush(&self) -> Result<(), IndexError> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Job::Flush(ack_tx))
            .map_err(|_| IndexError::WorkerStopped)?;
        ack_rx
            .recv()
            .map_err(|_| IndexError::WorkerStopped)?
            .map_err(|e| IndexError::Core(CoreError::Flush(e)))
    }

    /// Drain the queue and stop the worker thread.
    pub fn shutdown(mut self) -> Result<(), IndexError> {
        let flushed = self.flush();
        self.stop();
        flushed
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Job::Shutdown);
            if handle.join().is_err() {
                tracing::error!("index worker panicked");
            }
        }
    }
}

impl PendingWrites for IndexWorker {
    fn flush(&self, _environment: &EnvironmentId) -> Result<(), CoreError> {
        IndexWorker::flush(self).map_err(|e| CoreError::Flush(e.to_string()))
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(engine: Arc<SearchEngine>, rx: Receiver<Job>, interval: Duration, batch_size: usize) {
    let mut pending: Vec<CommandRecord> = Vec::new();
    let mut deadline: Option<Instant> = None;
    // Background commit failures, reported on the next flush.
    let mut failures: Vec<String> = Vec::new();

    loop {
        let job = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match job {
            Ok(Job::Index(record)) => {
                pending.push(record);
                deadline.get_or_insert_with(|| Instant::now() + interval);
                if pending.len() >= batch_size {
                    record_failure(&mut failures, commit(&engine, &mut pending));
                    deadline = None;
                }
            }
            Ok(Job::Flush(ack)) => {
                record_failure(&mut failures, commit(&engine, &mut pending));
                deadline = None;
                let result = if failures.is_empty() {
                    Ok(())
                } else {
                    Err(failures.drain(..).collect::<Vec<_>>().join("; "))
                };
                let _ = ack.send(result);
            }
            Err(RecvTimeoutError::Timeout) => {
                record_failure(&mut failures, commit(&engine, &mut pending));
                deadline = None;
            }
            Ok(Job::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                record_failure(&mut failures, commit(&engine, &mut pending));
                for failure in &failures {
                    tracing::error!("unreported indexing failure at shutdown: {failure}");
                }
                break;
            }
        }
    }
    tracing::debug!("index worker stopped");
}

fn record_failure(failures: &mut Vec<String>, result: Result<(), String>) {
    if let Err(e) = result {
        failures.push(e);
    }
}

/// Index everything pending, grouped by environment. Failures are logged
/// and reported; the affected records stay unindexed until a rebuild.
fn commit(engine: &SearchEngine, pending: &mut Vec<CommandRecord>) -> Result<(), String> {
    if pending.is_empty() {
        return Ok(());
    }

    let mut by_env: BTreeMap<EnvironmentId, Vec<CommandRecord>> = BTreeMap::new();
    for record in pending.drain(..) {
        match record.id.parts() {
            Ok((env, _)) => by_env.entry(env).or_default().push(record),
            Err(e) => tracing::error!(record = %record.id, "cannot index record: {e}"),
        }
    }

    let mut errors = Vec::new();
    for (env, records) in by_env {
        match engine.index_batch(&env, &records) {
            Ok(written) => tracing::debug!(environment = %env, written, "indexed batch"),
            Err(e) => {
                tracing::error!(environment = %env, "indexing failed: {e}");
                errors.push(format!("{env}: {e}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
