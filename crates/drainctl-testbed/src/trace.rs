//! Arrival-trace recording and replay.
//!
//! A trace file is the initial backlog followed by one inter-arrival gap
//! (nanoseconds) per message, bincode-encoded. Recording tees a live
//! message stream to disk; replay reproduces the stream with the recorded
//! gaps into any sink.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Leads every trace file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TraceHeader {
    initial_backlog: u64,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace io: {0}")]
    Io(#[from] std::io::Error),

    #[error("trace encoding: {0}")]
    Encode(#[from] bincode::Error),
}

/// Tee a message stream into a trace file at `path` while forwarding every
/// message to `forward`. Returns the sink to feed and the writer task;
/// dropping the sink finishes the file.
pub fn record(
    path: &Path,
    initial_backlog: u64,
    forward: mpsc::Sender<()>,
) -> Result<(mpsc::Sender<()>, JoinHandle<Result<(), TraceError>>), TraceError> {
    let mut file = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut file, &TraceHeader { initial_backlog })?;

    let (tx, mut rx) = mpsc::channel::<()>(64);
    let handle = tokio::spawn(async move {
        let mut last = Instant::now();
        let mut recorded = 0u64;
        while rx.recv().await.is_some() {
            let gap = last.elapsed();
            last = Instant::now();
            bincode::serialize_into(&mut file, &(gap.as_nanos() as u64))?;
            recorded += 1;
            if forward.send(()).await.is_err() {
                break;
            }
        }
        file.flush()?;
        info!(recorded, "trace recording finished");
        Ok(())
    });

    Ok((tx, handle))
}

/// Replays a recorded arrival stream.
pub struct TraceReplayer {
    reader: BufReader<File>,
    initial_backlog: u64,
}

impl TraceReplayer {
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        let mut reader = BufReader::new(File::open(path)?);
        let header: TraceHeader = bincode::deserialize_from(&mut reader)?;
        Ok(Self {
            reader,
            initial_backlog: header.initial_backlog,
        })
    }

    /// The backlog the plant should be seeded with before replaying.
    pub fn initial_backlog(&self) -> u64 {
        self.initial_backlog
    }

    /// Replay into `sink`, sleeping each recorded gap. Completes at the
    /// end of the trace, or early if the sink closes.
    pub async fn replay(mut self, sink: mpsc::Sender<()>) -> Result<(), TraceError> {
        let mut replayed = 0u64;
        loop {
            let gap: u64 = match bincode::deserialize_from(&mut self.reader) {
                Ok(gap) => gap,
                Err(e) => match *e {
                    bincode::ErrorKind::Io(ref io)
                        if io.kind() == std::io::ErrorKind::UnexpectedEof =>
                    {
                        info!(replayed, "trace replay finished");
                        return Ok(());
                    }
                    _ => return Err(e.into()),
                },
            };
            tokio::time::sleep(Duration::from_nanos(gap)).await;
            if sink.send(()).await.is_err() {
                return Ok(());
            }
            replayed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn recorded_stream_replays_in_full() {
        let dir = std::env::temp_dir().join("drainctl-trace-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("roundtrip.trace");

        let (forward_tx, mut forward_rx) = mpsc::channel(16);
        let (sink, writer) = record(&path, 9, forward_tx).unwrap();

        for _ in 0..5 {
            sink.send(()).await.unwrap();
            // Every recorded message is forwarded downstream live.
            assert_eq!(forward_rx.recv().await, Some(()));
        }
        drop(sink);
        writer.await.unwrap().unwrap();

        let replayer = TraceReplayer::open(&path).unwrap();
        assert_eq!(replayer.initial_backlog(), 9);

        let (replay_tx, mut replay_rx) = mpsc::channel(16);
        let replay = tokio::spawn(replayer.replay(replay_tx));

        let mut seen = 0;
        while replay_rx.recv().await.is_some() {
            seen += 1;
        }
        assert_eq!(seen, 5);
        replay.await.unwrap().unwrap();

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let missing = Path::new("/nonexistent/drainctl.trace");
        assert!(matches!(
            TraceReplayer::open(missing),
            Err(TraceError::Io(_))
        ));
    }
}
