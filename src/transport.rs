// src/transport.rs

use crate::config::DownloaderConfig;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
}

/// Fetches raw manifest and segment bytes.
///
/// Credentials are the caller's business: whatever cookies or tokens a request
/// needs are baked into the implementation before it reaches the core.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError>;

    async fn fetch_text(&self, url: &str) -> Result<String, TransportError> {
        let bytes = self.fetch(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// `reqwest`-backed transport sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &DownloaderConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(name.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self { client, timeout: config.request_timeout() })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
        let resp = self.client.get(url).timeout(self.timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16(), url: url.to_string() });
        }

        let mut body = match resp.content_length() {
            Some(len) => BytesMut::with_capacity(len as usize),
            None => BytesMut::new(),
        };
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body.freeze())
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    /// Handle on a request held in flight by [`ScriptedTransport::hold`].
    #[derive(Clone)]
    pub struct Gate {
        pub entered: Arc<Notify>,
        pub release: Arc<Notify>,
    }

    /// In-memory transport answering from a fixed URL table. Unknown URLs are 404s.
    #[derive(Default)]
    pub struct ScriptedTransport {
        responses: Mutex<HashMap<String, Bytes>>,
        requests: Mutex<Vec<String>>,
        held: Mutex<Option<(String, Gate)>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(self, url: &str, body: impl Into<Bytes>) -> Self {
            self.responses.lock().unwrap().insert(url.to_string(), body.into());
            self
        }

        /// Blocks the next request for `url` until the gate is released. Later
        /// requests for the same url pass straight through.
        pub fn hold(&self, url: &str) -> Gate {
            let gate = Gate { entered: Arc::new(Notify::new()), release: Arc::new(Notify::new()) };
            *self.held.lock().unwrap() = Some((url.to_string(), gate.clone()));
            gate
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    /// Transport whose every request panics.
    pub struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
            panic!("transport failure on {}", url)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch(&self, url: &str) -> Result<Bytes, TransportError> {
            self.requests.lock().unwrap().push(url.to_string());

            // a hold applies to one request only
            let gate = {
                let mut held = self.held.lock().unwrap();
                match held.take() {
                    Some((held_url, gate)) if held_url == url => Some(gate),
                    other => {
                        *held = other;
                        None
                    }
                }
            };
            if let Some(gate) = gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }

            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| TransportError::Status { status: 404, url: url.to_string() })
        }
    }
}
