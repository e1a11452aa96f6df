//! Transfer pipeline
//!
//! Sends one unit (a snapshot stream) to the remote store as three
//! concurrent stages joined by bounded chunk channels:
//!
//! ```text
//! read (snapshot stream) -> compress -> upload (remote write)
//! ```
//!
//! A failure in any stage fails the whole unit. Stages that fail only
//! because a neighbour went away are reported as knock-on failures, so the
//! error returned is the one that started the collapse. The pipeline never
//! retries.

mod channel;

pub use channel::{chunk_channel, ChunkReader, ChunkWriter, CHANNEL_DEPTH, CHUNK_SIZE};

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::collaborators::{Compressor, RemoteStore, SnapshotStore, SnapshotStream};
use crate::error::{BackupError, BackupResult};

/// One backup unit: a snapshot reference and where it goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    /// `dataset@label`
    pub source_ref: String,
    /// Destination key in the remote store
    pub object_key: String,
    /// Send descendants too (whole-pool replication stream)
    pub replicate: bool,
}

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub source_ref: String,
    pub object_key: String,
    /// Uncompressed bytes read from the snapshot stream
    pub bytes_read: u64,
    /// Bytes stored remotely
    pub bytes_written: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Read,
    Compress,
    Upload,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Compress => "compress",
            Self::Upload => "upload",
        }
    }
}

struct StageFailure {
    stage: Stage,
    error: BackupError,
    /// Failed only because a neighbouring stage went away
    knock_on: bool,
}

type StageResult = Result<u64, StageFailure>;

/// Streams snapshots through compression into the remote store
pub struct TransferPipeline<'a> {
    source: &'a dyn SnapshotStore,
    compressor: &'a dyn Compressor,
    remote: &'a dyn RemoteStore,
    cancel: CancelToken,
}

impl<'a> TransferPipeline<'a> {
    pub fn new(
        source: &'a dyn SnapshotStore,
        compressor: &'a dyn Compressor,
        remote: &'a dyn RemoteStore,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            compressor,
            remote,
            cancel,
        }
    }

    /// Send one unit
    ///
    /// On error the destination object was not committed.
    pub fn send(&self, unit: &TransferUnit) -> BackupResult<TransferReport> {
        self.cancel.check("send")?;
        let started = Instant::now();

        let stream = self
            .source
            .open_stream(&unit.source_ref, unit.replicate)
            .map_err(|e| BackupError::transfer(&unit.source_ref, format!("read stage: {}", e)))?;

        info!(
            source = %unit.source_ref,
            key = %unit.object_key,
            remote = %self.remote.location(),
            replicate = unit.replicate,
            "Starting transfer"
        );

        let (raw_tx, raw_rx) = chunk_channel(&self.cancel);
        let (packed_tx, packed_rx) = chunk_channel(&self.cancel);
        let compressor = self.compressor;
        let remote = self.remote;

        let results: [StageResult; 3] = thread::scope(|scope| {
            let reader = scope.spawn(move || read_stage(stream, raw_tx));
            let packer = scope.spawn(move || compress_stage(compressor, raw_rx, packed_tx));
            let uploader = scope.spawn(move || upload_stage(remote, &unit.object_key, packed_rx));

            [
                join_stage(Stage::Read, reader),
                join_stage(Stage::Compress, packer),
                join_stage(Stage::Upload, uploader),
            ]
        });

        match results {
            [Ok(bytes_read), Ok(_), Ok(bytes_written)] => {
                let report = TransferReport {
                    source_ref: unit.source_ref.clone(),
                    object_key: unit.object_key.clone(),
                    bytes_read,
                    bytes_written,
                    duration: started.elapsed(),
                };
                info!(
                    source = %report.source_ref,
                    key = %report.object_key,
                    bytes_read = report.bytes_read,
                    bytes_written = report.bytes_written,
                    duration_secs = report.duration.as_secs_f64(),
                    "Transfer complete"
                );
                Ok(report)
            }
            results => Err(self.primary_failure(unit, results)),
        }
    }

    fn primary_failure(&self, unit: &TransferUnit, results: [StageResult; 3]) -> BackupError {
        let failures: Vec<StageFailure> = results.into_iter().filter_map(Result::err).collect();

        for failure in &failures {
            debug!(
                source = %unit.source_ref,
                stage = failure.stage.name(),
                knock_on = failure.knock_on,
                error = %failure.error,
                "Transfer stage failed"
            );
        }

        if self.cancel.is_cancelled() {
            return BackupError::Cancelled(format!("transfer of {} interrupted", unit.source_ref));
        }

        let primary = failures
            .iter()
            .find(|f| !f.knock_on)
            .or_else(|| failures.first());

        match primary {
            Some(f) => BackupError::transfer(
                &unit.source_ref,
                format!("{} stage: {}", f.stage.name(), f.error),
            ),
            None => BackupError::transfer(&unit.source_ref, "pipeline failed without a cause"),
        }
    }
}

fn join_stage(stage: Stage, handle: thread::ScopedJoinHandle<'_, StageResult>) -> StageResult {
    handle.join().unwrap_or_else(|_| {
        Err(StageFailure {
            stage,
            error: BackupError::Io("stage thread panicked".into()),
            knock_on: false,
        })
    })
}

fn io_failure(stage: Stage, err: io::Error, knock_on: bool) -> StageFailure {
    StageFailure {
        stage,
        error: BackupError::Io(err.to_string()),
        knock_on,
    }
}

/// Drain the snapshot stream into the compressor's channel
fn read_stage(mut stream: Box<dyn SnapshotStream>, mut out: ChunkWriter) -> StageResult {
    let copied = io::copy(&mut stream, &mut out);
    let bytes = match copied {
        Ok(n) => n,
        Err(e) => {
            let knock_on = out.peer_closed();
            return Err(io_failure(Stage::Read, e, knock_on));
        }
    };

    // EOF alone is not success: the producer must also exit cleanly
    stream.finish().map_err(|error| StageFailure {
        stage: Stage::Read,
        error,
        knock_on: false,
    })?;

    out.finish()
        .map_err(|e| io_failure(Stage::Read, e, true))?;
    Ok(bytes)
}

fn compress_stage(
    compressor: &dyn Compressor,
    mut input: ChunkReader,
    mut output: ChunkWriter,
) -> StageResult {
    if let Err(error) = compressor.compress(&mut input, &mut output) {
        let knock_on = input.upstream_aborted() || output.peer_closed();
        return Err(StageFailure {
            stage: Stage::Compress,
            error,
            knock_on,
        });
    }

    output
        .finish()
        .map_err(|e| io_failure(Stage::Compress, e, true))
}

fn upload_stage(remote: &dyn RemoteStore, key: &str, mut input: ChunkReader) -> StageResult {
    remote.write(key, &mut input).map_err(|error| StageFailure {
        stage: Stage::Upload,
        error,
        knock_on: input.upstream_aborted(),
    })
}
