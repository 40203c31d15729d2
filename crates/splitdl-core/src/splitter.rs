//! Splitter - turns one remote resource into size-capped part files
//!
//! A `PartCursor` streams the body lazily: nothing is fetched until the first
//! `next_part` call, and each call stages exactly one part. At most one
//! network chunk is read ahead, to tell whether the part just sealed is the
//! last one.

use crate::error::SplitdlError;
use crate::fetch::{ByteStream, Fetcher};
use bytes::Bytes;
use futures::StreamExt;
use splitdl_types::Part;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Nothing fetched yet
    Pending,
    Streaming,
    Finished,
    Failed,
}

/// Resumable production state for the parts of one download
pub struct PartCursor {
    url: String,
    part_size: u64,
    max_size: u64,
    fetcher: Arc<dyn Fetcher>,
    staging_dir: PathBuf,
    file_name: String,
    state: CursorState,
    body: Option<ByteStream>,
    /// Chunk read ahead of the current part, already counted in `fetched`
    carry: Option<Bytes>,
    /// Part count derived from the declared length
    expected_total: Option<u32>,
    fetched: u64,
    next_index: u32,
    /// Previously yielded part file, removed on the next pull
    last_part: Option<PathBuf>,
    cleaned: bool,
}

/// Start splitting `url` into parts of at most `part_size` bytes.
///
/// The returned cursor is idle; the transfer begins on the first
/// `next_part` call. Part files are staged in a fresh directory under
/// `work_dir`.
pub fn split(
    url: &str,
    part_size: u64,
    max_size: u64,
    fetcher: Arc<dyn Fetcher>,
    work_dir: &Path,
) -> PartCursor {
    PartCursor {
        url: url.to_string(),
        part_size: part_size.max(1),
        max_size,
        fetcher,
        staging_dir: work_dir.join(Uuid::new_v4().to_string()),
        file_name: file_name_from_url(url),
        state: CursorState::Pending,
        body: None,
        carry: None,
        expected_total: None,
        fetched: 0,
        next_index: 1,
        last_part: None,
        cleaned: false,
    }
}

impl PartCursor {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bytes received from the remote so far
    pub fn bytes_fetched(&self) -> u64 {
        self.fetched
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, CursorState::Finished | CursorState::Failed)
    }

    /// Stage the next part.
    ///
    /// Returns `Ok(None)` once the cursor has finished or failed; a failed
    /// cursor is never restarted. On error every staged file of the job is
    /// removed.
    pub async fn next_part(&mut self) -> Result<Option<Part>, SplitdlError> {
        match self.state {
            CursorState::Finished | CursorState::Failed => return Ok(None),
            CursorState::Pending => {
                if let Err(e) = self.start().await {
                    return Err(self.fail(e).await);
                }
            }
            CursorState::Streaming => {}
        }

        self.discard_previous().await;

        match self.fill_next_part().await {
            Ok(part) => {
                if part.is_last() {
                    self.state = CursorState::Finished;
                    self.body = None;
                    debug!("All {} parts of {} staged", part.total, self.url);
                }
                Ok(Some(part))
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Release the transfer and delete every staged file.
    pub async fn close(mut self) {
        self.body = None;
        self.carry = None;
        if self.state != CursorState::Failed {
            self.state = CursorState::Finished;
        }
        remove_staging(&self.staging_dir).await;
        self.cleaned = true;
    }

    async fn start(&mut self) -> Result<(), SplitdlError> {
        info!("Starting transfer of {}", self.url);
        let response = self.fetcher.open(&self.url).await?;

        if let Some(length) = response.content_length {
            if length > self.max_size {
                return Err(SplitdlError::SizeExceeded {
                    limit: self.max_size,
                    fetched: length,
                });
            }
            if length > 0 {
                let total = u32::try_from(length.div_ceil(self.part_size))
                    .map_err(|_| SplitdlError::TooManyParts)?;
                self.expected_total = Some(total);
            }
        }

        fs::create_dir_all(&self.staging_dir).await?;
        self.body = Some(response.body);
        self.state = CursorState::Streaming;
        Ok(())
    }

    async fn fill_next_part(&mut self) -> Result<Part, SplitdlError> {
        let index = self.next_index;
        let mut path = self
            .staging_dir
            .join(format!("{}.part{}", self.file_name, index));

        let mut file = fs::File::create(&path).await?;
        let mut written = 0u64;

        while written < self.part_size {
            let Some(mut chunk) = self.next_chunk().await? else {
                break;
            };
            let room = (self.part_size - written) as usize;
            if chunk.len() > room {
                self.carry = Some(chunk.split_off(room));
            }
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        drop(file);

        if written == 0 {
            let _ = fs::remove_file(&path).await;
            return Err(SplitdlError::EmptyResource);
        }

        let has_more = self.peek().await?;
        if has_more && index == u32::MAX {
            return Err(SplitdlError::TooManyParts);
        }
        let total = if has_more {
            self.expected_total.unwrap_or(0).max(index + 1)
        } else {
            index
        };

        // A single-part download keeps the remote file name
        if index == 1 && !has_more {
            let whole = self.staging_dir.join(&self.file_name);
            fs::rename(&path, &whole).await?;
            path = whole;
        }

        debug!("Staged part {}/{} of {} ({} bytes)", index, total, self.url, written);

        self.next_index = index.saturating_add(1);
        self.last_part = Some(path.clone());

        Ok(Part {
            path,
            index,
            total,
            size: written,
        })
    }

    /// Next non-empty chunk, counting it against the size ceiling
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SplitdlError> {
        if let Some(chunk) = self.carry.take() {
            return Ok(Some(chunk));
        }

        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            self.fetched += chunk.len() as u64;
            if self.fetched > self.max_size {
                return Err(SplitdlError::SizeExceeded {
                    limit: self.max_size,
                    fetched: self.fetched,
                });
            }
            return Ok(Some(chunk));
        }

        self.body = None;
        Ok(None)
    }

    async fn peek(&mut self) -> Result<bool, SplitdlError> {
        if self.carry.is_some() {
            return Ok(true);
        }
        match self.next_chunk().await? {
            Some(chunk) => {
                self.carry = Some(chunk);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn discard_previous(&mut self) {
        if let Some(previous) = self.last_part.take() {
            // the sink is allowed to move delivered parts away
            match fs::remove_file(&previous).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove delivered part {}: {}", previous.display(), e)
                }
            }
        }
    }

    async fn fail(&mut self, error: SplitdlError) -> SplitdlError {
        self.state = CursorState::Failed;
        self.body = None;
        self.carry = None;
        self.last_part = None;
        remove_staging(&self.staging_dir).await;
        error
    }
}

impl Drop for PartCursor {
    // Blocking removal is intended: this only runs for cursors abandoned
    // without `close`, and there is no runtime handle to await on here.
    fn drop(&mut self) {
        if !self.cleaned && self.staging_dir.exists() {
            let _ = std::fs::remove_dir_all(&self.staging_dir);
        }
    }
}

impl std::fmt::Debug for PartCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartCursor")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("fetched", &self.fetched)
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

async fn remove_staging(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging dir {}: {}", dir.display(), e),
    }
}

/// File name for the staged parts, taken from the last URL path segment
pub fn file_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|s| s.last().map(|s| s.to_string()))
        })
        .map(|name| {
            name.chars()
                .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
                .collect::<String>()
        })
        .filter(|name| !name.is_empty() && name != "." && name != "..")
        .unwrap_or_else(|| "download".to_string())
}
