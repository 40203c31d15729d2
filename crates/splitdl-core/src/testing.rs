//! In-memory fetcher and sink used by the unit tests

use crate::delivery::DeliverySink;
use crate::error::SplitdlError;
use crate::fetch::{FetchResponse, Fetcher};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Serves fixed bodies, split into fixed-size chunks
#[derive(Clone)]
pub struct MemoryFetcher {
    bodies: HashMap<String, Vec<u8>>,
    default_body: Option<Vec<u8>>,
    chunk_size: usize,
    declared_length: Option<u64>,
    hide_length: bool,
    fail_after: Option<usize>,
    opened: Arc<AtomicUsize>,
}

impl MemoryFetcher {
    /// Serve `body` for every URL
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            bodies: HashMap::new(),
            default_body: Some(body),
            chunk_size: 8,
            declared_length: None,
            hide_length: false,
            fail_after: None,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serve only the registered URLs; anything else is a 404
    pub fn routes() -> Self {
        Self {
            default_body: None,
            ..Self::new(Vec::new())
        }
    }

    pub fn route(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn declare_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    pub fn hide_length(mut self) -> Self {
        self.hide_length = true;
        self
    }

    /// Break the stream with an I/O error after `chunks` chunks
    pub fn fail_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn open(&self, url: &str) -> Result<FetchResponse, SplitdlError> {
        self.opened.fetch_add(1, Ordering::SeqCst);

        let body = self
            .bodies
            .get(url)
            .or(self.default_body.as_ref())
            .cloned()
            .ok_or_else(|| SplitdlError::ServerError {
                status: 404,
                message: format!("no route for {}", url),
            })?;

        let content_length = if self.hide_length {
            None
        } else {
            Some(self.declared_length.unwrap_or(body.len() as u64))
        };

        let mut chunks: Vec<Result<Bytes, SplitdlError>> = body
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if let Some(limit) = self.fail_after {
            chunks.truncate(limit);
            chunks.push(Err(SplitdlError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))));
        }

        Ok(FetchResponse {
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

/// One call to the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub recipient: String,
    pub text: String,
    pub file: Option<PathBuf>,
    /// File content at delivery time
    pub content: Option<Vec<u8>>,
}

/// Sink that remembers everything it was handed
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub delivered: Arc<Mutex<Vec<Delivered>>>,
    pub fail_for: Option<String>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every delivery to `recipient`
    pub fn failing_for(recipient: &str) -> Self {
        Self {
            fail_for: Some(recipient.to_string()),
            ..Self::default()
        }
    }

    pub fn texts_for(&self, recipient: &str) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .filter(|d| d.recipient == recipient)
            .map(|d| d.text.clone())
            .collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(
        &self,
        recipient: &str,
        text: &str,
        file: Option<&Path>,
    ) -> Result<(), SplitdlError> {
        if self.fail_for.as_deref() == Some(recipient) {
            return Err(SplitdlError::Delivery(format!("{} is unreachable", recipient)));
        }

        let content = match file {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };
        self.delivered.lock().push(Delivered {
            recipient: recipient.to_string(),
            text: text.to_string(),
            file: file.map(Path::to_path_buf),
            content,
        });
        Ok(())
    }
}
