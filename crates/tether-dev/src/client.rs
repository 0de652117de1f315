//! Client for a running dev session.
//!
//! [`DevClient::stream`] follows the session's event feed and hands back
//! typed values reconstructed through a [`TypeRegistry`]. Kinds the registry
//! does not know are skipped, so old clients keep working against newer
//! sessions.

use crate::dev::{EnvQuery, EnvResponse};
use crate::error::{DevError, Result};
use crate::events::CompleteEvent;
use tether_bus::{Envelope, LineDecoder, TypeRegistry};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Decoded events buffered ahead of the consumer.
const STREAM_QUEUE_CAPACITY: usize = 256;

/// HTTP client bound to one session URL.
#[derive(Debug, Clone)]
pub struct DevClient {
    http: reqwest::Client,
    url: String,
}

impl DevClient {
    /// `url` is the session base, e.g. `http://127.0.0.1:13557`.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        Self { http, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Opens `/stream` and decodes events until `cancel` fires, the session
    /// closes the connection, or the returned receiver is dropped.
    ///
    /// # Errors
    ///
    /// Fails only if the connection cannot be opened; later transport errors
    /// end the stream.
    pub async fn stream<T>(
        &self,
        registry: TypeRegistry<T>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<T>>
    where
        T: Send + 'static,
    {
        let url = format!("{}/stream", self.url);
        let response = check_status(&url, self.http.get(&url).send().await?).await?;
        tracing::debug!(%url, "stream connected");

        let (tx, rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
        tokio::spawn(decode_stream(response, registry, tx, cancel));
        Ok(rx)
    }

    /// Looks up a dev's environment and command.
    pub async fn env(&self, query: &EnvQuery) -> Result<EnvResponse> {
        let url = format!("{}/api/env", self.url);
        let response = self.http.get(&url).query(query).send().await?;
        Ok(check_status(&url, response).await?.json().await?)
    }

    /// Asks the session to deploy again.
    pub async fn deploy(&self) -> Result<()> {
        let url = format!("{}/api/deploy", self.url);
        check_status(&url, self.http.post(&url).send().await?).await?;
        Ok(())
    }

    /// Latest completion snapshot; empty if no deploy finished yet.
    pub async fn completed(&self) -> Result<CompleteEvent> {
        let url = format!("{}/api/completed", self.url);
        let response = self.http.get(&url).send().await?;
        Ok(check_status(&url, response).await?.json().await?)
    }
}

async fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DevError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

async fn decode_stream<T>(
    mut response: reqwest::Response,
    registry: TypeRegistry<T>,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
) {
    let mut decoder = LineDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            Ok(Some(bytes)) => {
                for line in decoder.push(&bytes) {
                    if !forward(&registry, &line, &tx).await {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some(line) = decoder.finish() {
                    forward(&registry, &line, &tx).await;
                }
                break;
            }
            Err(err) => {
                tracing::debug!(error = %err, "stream transport error");
                break;
            }
        }
    }
    tracing::debug!("stream ended");
}

/// Decodes one line and sends it on. Returns false once the receiver is gone.
async fn forward<T>(registry: &TypeRegistry<T>, line: &[u8], tx: &mpsc::Sender<T>) -> bool {
    let envelope = match Envelope::from_line(line) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(error = %err, "skipping malformed stream line");
            return true;
        }
    };
    let kind = envelope.kind.clone();
    match registry.decode(envelope) {
        None => {
            tracing::debug!(%kind, "skipping unregistered event kind");
            true
        }
        Some(Err(err)) => {
            tracing::warn!(error = %err, "skipping undecodable event");
            true
        }
        Some(Ok(value)) => tx.send(value).await.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = DevClient::new("http://127.0.0.1:13557/");
        assert_eq!(client.url(), "http://127.0.0.1:13557");
    }
}
