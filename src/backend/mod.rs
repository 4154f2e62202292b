use crate::models::chat::Turn;
use bytes::Bytes;
use futures::{ Stream, StreamExt };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Error)]
pub enum BackendError {
    /// Network failure or request timeout.
    #[error("backend request failed: {0}")]
    Unavailable(#[from] reqwest::Error),
    /// Backend answered with a non-success status; body kept verbatim.
    #[error("Error {status}: {body}")]
    BadStatus { status: u16, body: String },
    /// Backend answered 200 but the reply had no message content.
    #[error("backend reply is missing message.content")]
    MissingReplyField,
}

/// Wire payload for the backend's POST /api/chat.
#[derive(Clone, Debug, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<Turn>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatOptions {
    pub temperature: f64,
}

#[derive(Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// HTTP client for the model backend. One `reqwest::Client` shared across
/// requests, with the per-request timeout baked in at construction.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: HttpClient,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    /// One request, one complete reply. Non-success statuses carry the body
    /// back verbatim; a success body without `message.content` is an error,
    /// not an empty reply.
    pub async fn chat_buffered(&self, payload: &ChatPayload) -> Result<String, BackendError> {
        let resp = self.http.post(self.chat_url()).json(payload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }
        let reply: ChatReply = serde_json
            ::from_str(&body)
            .map_err(|_| BackendError::MissingReplyField)?;
        reply.message
            .and_then(|m| m.content)
            .ok_or(BackendError::MissingReplyField)
    }

    /// Lazy, forward-only sequence of raw chunks, exactly as received on the
    /// wire. The request runs in a spawned task feeding a bounded channel so
    /// at most a handful of chunks are ever buffered; a network error or
    /// timeout terminates the sequence with an `Err` item, and anything
    /// already forwarded stays forwarded.
    pub async fn chat_streamed(&self, payload: ChatPayload) -> ChunkStream {
        let (tx, rx) = mpsc::channel(32);
        let client = self.http.clone();
        let url = self.chat_url();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        let body = resp.text().await.unwrap_or_default();
                        let _ = tx
                            .send(Err(BackendError::BadStatus { status: status.as_u16(), body }))
                            .await;
                        return;
                    }
                    let mut chunks = resp.bytes_stream();
                    while let Some(chunk) = chunks.next().await {
                        match chunk {
                            Ok(bytes) => {
                                if tx.send(Ok(bytes)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(BackendError::Unavailable(e))).await;
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(BackendError::Unavailable(e))).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}
