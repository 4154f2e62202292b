use crate::backend::{ BackendClient, BackendError, ChatOptions, ChatPayload };
use crate::history::ConversationStore;
use crate::models::chat::{ ChatRequest, Role, Turn };
use bytes::Bytes;
use futures::StreamExt;
use log::{ info, warn };
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{ mpsc, Mutex };
use tokio_stream::wrappers::ReceiverStream;

/// What `StreamReassembler::absorb` made of one raw chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Content extracted from this chunk, in arrival order.
    Parsed(String),
    /// Chunk contributed nothing; the relay keeps going regardless.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    InvalidUtf8,
    MalformedJson,
    NoContent,
    Blank,
}

#[derive(Deserialize)]
struct ChunkLine {
    message: Option<ChunkMessage>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    content: Option<String>,
}

/// Rebuilds the full assistant reply from the raw chunk sequence, one chunk
/// at a time, independently of what is forwarded to the caller.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    reply: String,
    skipped: usize,
    finished: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks the chunk's non-empty lines, parsing each as one JSON object
    /// and accumulating every non-empty `message.content`. A malformed or
    /// boundary-split chunk is counted and skipped, never fatal.
    pub fn absorb(&mut self, chunk: &[u8]) -> ChunkOutcome {
        let text = match std::str::from_utf8(chunk) {
            Ok(text) => text,
            Err(_) => {
                return self.skip(SkipReason::InvalidUtf8);
            }
        };
        if text.trim().is_empty() {
            return self.skip(SkipReason::Blank);
        }

        let mut fragment = String::new();
        let mut malformed = false;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ChunkLine>(line) {
                Ok(parsed) => {
                    if let Some(content) = parsed.message.and_then(|m| m.content) {
                        fragment.push_str(&content);
                    }
                }
                Err(e) => {
                    info!("Could not decode JSON chunk for history: {} ({})", line, e);
                    malformed = true;
                }
            }
        }

        if fragment.is_empty() {
            let reason = if malformed { SkipReason::MalformedJson } else { SkipReason::NoContent };
            return self.skip(reason);
        }
        self.reply.push_str(&fragment);
        ChunkOutcome::Parsed(fragment)
    }

    fn skip(&mut self, reason: SkipReason) -> ChunkOutcome {
        self.skipped += 1;
        ChunkOutcome::Skipped(reason)
    }

    /// Chunks that contributed nothing so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// One-shot finalization. The first call yields the reassembled reply if
    /// any chunk contributed content; every later call yields `None`, even
    /// when the transport signals end-of-stream redundantly.
    pub fn finish(&mut self) -> Option<String> {
        if self.finished || self.reply.is_empty() {
            return None;
        }
        self.finished = true;
        Some(std::mem::take(&mut self.reply))
    }
}

/// Orchestrates one chat turn: appends the user turn, drives the backend in
/// buffered or streamed mode, and commits the assistant turn exactly once.
pub struct ChatRelay {
    store: Arc<Mutex<ConversationStore>>,
    backend: BackendClient,
    // One relay in flight at a time; a second chat request waits here
    // instead of racing on the conversation.
    in_flight: Arc<Mutex<()>>,
}

impl ChatRelay {
    pub fn new(store: Arc<Mutex<ConversationStore>>, backend: BackendClient) -> Self {
        Self {
            store,
            backend,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Records the user turn before the backend is contacted, so it survives
    /// a backend failure, and snapshots the conversation for the wire.
    async fn begin_turn(&self, request: &ChatRequest) -> ChatPayload {
        let mut store = self.store.lock().await;
        store.append(Turn::new(Role::User, request.message.clone()));
        ChatPayload {
            model: request.model.clone(),
            messages: store.snapshot(),
            stream: request.stream,
            options: ChatOptions { temperature: request.temperature },
        }
    }

    async fn commit_assistant_turn(store: &Mutex<ConversationStore>, reply: &str) {
        let mut store = store.lock().await;
        store.append(Turn::new(Role::Assistant, reply));
        if let Err(e) = store.persist() {
            warn!("Failed to persist history: {}", e);
        }
    }

    /// Buffered mode: the assistant turn is appended and persisted before
    /// the reply is returned. On error only the user turn remains appended.
    pub async fn chat_buffered(&self, request: &ChatRequest) -> Result<String, BackendError> {
        let _gate = self.in_flight.lock().await;
        let payload = self.begin_turn(request).await;
        let reply = self.backend.chat_buffered(&payload).await?;
        info!("Assistant: {}", reply);
        Self::commit_assistant_turn(&self.store, &reply).await;
        Ok(reply)
    }

    /// Streamed mode: raw chunks are forwarded to the returned stream as
    /// they arrive, ahead of any parsing, while the reassembler builds the
    /// reply on the side. The commit at stream end is the only persistence
    /// point, and it only happens when the backend finished cleanly: a
    /// stream cut short by a network failure or timeout discards whatever
    /// was reassembled so far rather than committing a partial turn. The
    /// in-flight gate travels into the relay task and is released only
    /// after commit.
    pub async fn chat_streamed(&self, request: &ChatRequest) -> ReceiverStream<Bytes> {
        let gate = self.in_flight.clone().lock_owned().await;
        let payload = self.begin_turn(request).await;
        let mut upstream = self.backend.chat_streamed(payload).await;
        let (tx, rx) = mpsc::channel(32);
        let store = self.store.clone();

        tokio::spawn(async move {
            let _gate = gate;
            let mut reassembler = StreamReassembler::new();
            let mut failed = false;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        // A closed receiver means the caller went away; the
                        // backend stream is still drained so the finished
                        // turn commits whole or not at all.
                        let _ = tx.send(chunk.clone()).await;
                        reassembler.absorb(&chunk);
                    }
                    Err(e) => {
                        warn!("Backend stream ended with error: {}", e);
                        failed = true;
                        break;
                    }
                }
            }
            if reassembler.skipped() > 0 {
                info!("Skipped {} undecodable chunks while reassembling", reassembler.skipped());
            }
            if failed {
                // Commit is all or nothing; fragments received before the
                // failure are dropped.
                return;
            }
            if let Some(reply) = reassembler.finish() {
                info!("Assistant (streamed): {}", reply);
                Self::commit_assistant_turn(&store, &reply).await;
            }
        });

        ReceiverStream::new(rx)
    }

    /// Snapshot read of the conversation.
    pub async fn history(&self) -> Vec<Turn> {
        self.store.lock().await.snapshot()
    }

    /// Clears the conversation back to the system prompt and persists
    /// immediately.
    pub async fn reset(&self) {
        let mut store = self.store.lock().await;
        store.reset();
        if let Err(e) = store.persist() {
            warn!("Failed to persist history after reset: {}", e);
        }
    }
}
