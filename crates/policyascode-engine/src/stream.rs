//! StreamSession: one oracle invocation as a sequence of snapshots
//!
//! A producer task pulls deltas from the oracle, reconciles the accumulated
//! text after every delta and forwards a [`Snapshot`] whenever the decoded
//! value changes. The consumer side is a single-pass [`SnapshotStream`]:
//!
//! ```text
//!  Oracle ──deltas──► producer task ──Snapshot──► mpsc ──► SnapshotStream::next()
//!                      (Reconciler)                         (drop = abort + release)
//! ```
//!
//! The last item of a successful stream is always a snapshot with
//! `complete == true`. An oracle error is the last item of a failed one.

use crate::oracle::{Oracle, OracleError, OracleRequest};
use crate::partial_json::Reconciler;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SNAPSHOT_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub value: Value,
    /// Set only on the final snapshot.
    pub complete: bool,
    /// Bytes of text received so far.
    pub received: usize,
}

pub struct StreamSession;

impl StreamSession {
    /// Start the invocation. Must be called from within a tokio runtime.
    pub fn open(oracle: Arc<dyn Oracle>, request: OracleRequest) -> SnapshotStream {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let task = tokio::spawn(produce(oracle, request, tx));
        SnapshotStream { rx, task }
    }
}

async fn produce(
    oracle: Arc<dyn Oracle>,
    request: OracleRequest,
    tx: mpsc::Sender<Result<Snapshot, OracleError>>,
) {
    let schema = request.schema.name.clone();
    let mut source = match oracle.stream(request).await {
        Ok(source) => source,
        Err(err) => {
            tracing::warn!(oracle = oracle.name(), %schema, error = %err, "oracle request failed");
            let _ = tx.send(Err(err)).await;
            return;
        }
    };

    let mut reconciler = Reconciler::new();
    let mut last: Option<Value> = None;
    while let Some(delta) = source.next_delta().await {
        let delta = match delta {
            Ok(delta) => delta,
            Err(err) => {
                tracing::warn!(oracle = oracle.name(), %schema, error = %err, "stream failed");
                let _ = tx.send(Err(err)).await;
                return;
            }
        };

        let Some(value) = reconciler.push(&delta) else {
            tracing::trace!(received = reconciler.len(), "buffer not decodable yet");
            continue;
        };
        if last.as_ref() == Some(&value) {
            continue;
        }
        last = Some(value.clone());
        let snapshot = Snapshot {
            value,
            complete: false,
            received: reconciler.len(),
        };
        if tx.send(Ok(snapshot)).await.is_err() {
            tracing::debug!(%schema, "consumer went away; closing stream");
            return;
        }
    }

    let value = reconciler.value().unwrap_or(Value::Null);
    tracing::debug!(%schema, received = reconciler.len(), "stream complete");
    let _ = tx
        .send(Ok(Snapshot {
            value,
            complete: true,
            received: reconciler.len(),
        }))
        .await;
}

/// Consumer half of a [`StreamSession`]. Dropping it aborts the producer,
/// which drops the oracle's delta source and with it the transport.
pub struct SnapshotStream {
    rx: mpsc::Receiver<Result<Snapshot, OracleError>>,
    task: JoinHandle<()>,
}

impl SnapshotStream {
    pub async fn next(&mut self) -> Option<Result<Snapshot, OracleError>> {
        self.rx.recv().await
    }

    /// Drain to the end and return the final value.
    pub async fn finish(mut self) -> Result<Value, OracleError> {
        while let Some(item) = self.next().await {
            let snapshot = item?;
            if snapshot.complete {
                return Ok(snapshot.value);
            }
        }
        Err(OracleError::Stream(
            "stream ended before completion".to_string(),
        ))
    }
}

impl Drop for SnapshotStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
