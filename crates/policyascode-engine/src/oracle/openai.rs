//! OpenAI Responses API oracle (streaming)

use super::responses::{interpret, StreamSignal};
use super::{DeltaSource, Oracle, OracleConfig, OracleError, OracleRequest};
use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::fmt::Display;
use std::time::Duration;

type EventStream = BoxStream<'static, Result<Event, String>>;

pub struct OpenAiOracle {
    client: Client,
    config: OracleConfig,
}

impl OpenAiOracle {
    pub fn new(config: OracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    fn body(&self, request: &OracleRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "instructions": request.instructions,
            "input": [{ "role": "user", "content": request.input }],
            "text": {
                "format": {
                    "type": "json_schema",
                    "strict": true,
                    "name": request.schema.name,
                    "schema": request.schema.schema,
                }
            },
            "stream": true,
        })
    }
}

#[async_trait]
impl Oracle for OpenAiOracle {
    async fn stream(&self, request: OracleRequest) -> Result<Box<dyn DeltaSource>, OracleError> {
        let url = self.config.responses_url();
        tracing::debug!(%url, schema = %request.schema.name, "opening response stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header("Accept", "text/event-stream")
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(OracleError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Box::new(SseSource::new(response.bytes_stream())))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

struct SseSource {
    events: EventStream,
    finished: bool,
}

impl SseSource {
    fn new<S, B, E>(bytes: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]>,
        E: Display,
    {
        let events = bytes
            .eventsource()
            .map(|event| event.map_err(|e| e.to_string()))
            .boxed();
        Self {
            events,
            finished: false,
        }
    }
}

#[async_trait]
impl DeltaSource for SseSource {
    async fn next_delta(&mut self) -> Option<Result<String, OracleError>> {
        if self.finished {
            return None;
        }
        while let Some(event) = self.events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(OracleError::Network(e)));
                }
            };
            match interpret(&event.event, &event.data) {
                StreamSignal::Delta(text) if !text.is_empty() => return Some(Ok(text)),
                StreamSignal::Delta(_) | StreamSignal::Ignore => {}
                StreamSignal::Error(message) => {
                    self.finished = true;
                    return Some(Err(OracleError::Stream(message)));
                }
                StreamSignal::Done => break,
            }
        }
        self.finished = true;
        None
    }
}
