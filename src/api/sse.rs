//! Server-sent event stream client for device notifications.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;

use crate::config::{self, Config};
use crate::events::EventRecord;

#[derive(Error, Debug)]
pub enum SseError {
    #[error("Connection failed: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("Event stream rejected: {0}")]
    Status(reqwest::StatusCode),
}

/// Listener invoked for every event record
pub type Listener = Box<dyn Fn(&EventRecord) + Send + Sync>;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Works on raw bytes and splits on `\n`, so a multi-byte character cut by a
/// chunk boundary is reassembled before decoding. Each complete line is
/// decoded lossily; invalid bytes never hold back later frames. Returns the
/// `data` payload of every complete frame. Comments and `event`/`id`/`retry`
/// fields are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    frames.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field == "data" {
                self.data.push(value.to_string());
            }
        }

        frames
    }
}

/// Owns the single event-stream connection of a session.
///
/// Listeners are registered before `start`, which consumes the manager so the
/// stream can only be started once.
pub struct EventSubscription {
    client: reqwest::Client,
    url: String,
    access_token: Option<String>,
    reconnect_delay: Duration,
    listeners: Vec<Listener>,
}

impl EventSubscription {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.event_stream_url(),
            access_token: config.access_token.clone(),
            reconnect_delay: config.reconnect_delay,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver a record to every listener in registration order
    pub fn dispatch(&self, record: &EventRecord) {
        for listener in &self.listeners {
            listener(record);
        }
    }

    /// Open the stream on the given runtime. Reconnects after errors for the
    /// lifetime of the process.
    pub fn start(self, runtime: &tokio::runtime::Handle) {
        log::info!(
            "Subscribing for SSE at {} with {} listener(s)",
            self.url,
            self.listener_count()
        );

        let subscription = Arc::new(self);
        runtime.spawn(async move {
            loop {
                match subscription.read_stream().await {
                    Ok(()) => log::info!("Event stream ended"),
                    Err(e) => log::error!("Event stream error: {}", e),
                }
                tokio::time::sleep(subscription.reconnect_delay).await;
            }
        });
    }

    /// Read one connection to its end, dispatching every decoded event
    async fn read_stream(&self) -> Result<(), SseError> {
        let mut request = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        if let Some(ref token) = self.access_token {
            request = request.header(config::ACCESS_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SseError::Status(response.status()));
        }
        log::info!("Event stream connected");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            for data in decoder.push(&chunk?) {
                match serde_json::from_str::<EventRecord>(&data) {
                    Ok(record) => {
                        log::debug!("Received event: {}", data);
                        self.dispatch(&record);
                    }
                    Err(e) => log::warn!("Failed to parse event: {} - {}", e, data),
                }
            }
        }

        Ok(())
    }
}
