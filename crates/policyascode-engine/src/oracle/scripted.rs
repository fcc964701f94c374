//! Scripted oracle for tests and offline runs
//!
//! Plays back pre-recorded delta sequences. Each [`Script`] is consumed by the
//! first request it matches, so concurrent callers can be routed by input
//! (e.g. by filename) regardless of scheduling order.

use super::{DeltaSource, Oracle, OracleError, OracleRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One recorded response.
#[derive(Debug, Clone, Default)]
pub struct Script {
    deltas: Vec<String>,
    /// Fail with this message after emitting this many deltas.
    fail_after: Option<(usize, String)>,
    /// Refuse the request outright.
    reject: Option<OracleError>,
    delay: Option<Duration>,
    /// Only match requests whose input or instructions contain this text.
    needle: Option<String>,
}

impl Script {
    pub fn deltas<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Serialize `value` and split it into `chunk`-character deltas.
    pub fn json(value: &serde_json::Value, chunk: usize) -> Self {
        let text = value.to_string();
        let chars: Vec<char> = text.chars().collect();
        Self::deltas(
            chars
                .chunks(chunk.max(1))
                .map(|c| c.iter().collect::<String>()),
        )
    }

    pub fn rejecting(error: OracleError) -> Self {
        Self {
            reject: Some(error),
            ..Default::default()
        }
    }

    pub fn fail_after(mut self, emitted: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((emitted, message.into()));
        self
    }

    /// Sleep before each delta.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn for_input(mut self, needle: impl Into<String>) -> Self {
        self.needle = Some(needle.into());
        self
    }

    fn matches(&self, request: &OracleRequest) -> bool {
        match &self.needle {
            None => true,
            Some(needle) => {
                request.instructions.contains(needle.as_str())
                    || request.input.iter().any(|p| p.text().contains(needle.as_str()))
            }
        }
    }
}

#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<OracleRequest>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedOracle {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.scripts.lock().len()
    }

    /// Number of delta sources that have been dropped.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn stream(&self, request: OracleRequest) -> Result<Box<dyn DeltaSource>, OracleError> {
        let script = {
            let mut scripts = self.scripts.lock();
            let position = scripts.iter().position(|s| s.matches(&request));
            position.and_then(|p| scripts.remove(p))
        };
        self.requests.lock().push(request);

        let script = script.ok_or_else(|| {
            OracleError::InvalidResponse("no scripted response left for request".to_string())
        })?;
        if let Some(error) = script.reject {
            return Err(error);
        }

        Ok(Box::new(ScriptedSource {
            deltas: script.deltas.into(),
            fail_after: script.fail_after,
            delay: script.delay,
            emitted: 0,
            released: Arc::clone(&self.released),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedSource {
    deltas: VecDeque<String>,
    fail_after: Option<(usize, String)>,
    delay: Option<Duration>,
    emitted: usize,
    released: Arc<AtomicUsize>,
}

#[async_trait]
impl DeltaSource for ScriptedSource {
    async fn next_delta(&mut self) -> Option<Result<String, OracleError>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((after, message)) = &self.fail_after {
            if self.emitted >= *after {
                let error = OracleError::Stream(message.clone());
                self.fail_after = None;
                self.deltas.clear();
                return Some(Err(error));
            }
        }
        let delta = self.deltas.pop_front()?;
        self.emitted += 1;
        Some(Ok(delta))
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
