//! Shared types for splitdl
//!
//! This crate contains the data structures shared by the queue engine
//! and the CLI front end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// One mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Default maximum total size of a single download
pub const DEFAULT_MAX_SIZE: u64 = MIB * 2_000_000;

/// Default size cap of a single part
pub const DEFAULT_PART_SIZE: u64 = MIB * 20;

/// Default delay between delivery cycles, in seconds
pub const DEFAULT_DELAY_SECS: u64 = 60;

/// Default number of jobs the registry accepts at once
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

// ============================================================================
// Part Types
// ============================================================================

/// One size-bounded slice of a download, staged as a local file.
///
/// `index` is 1-based and never exceeds `total`. Only the final part of a
/// job has `index == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub path: PathBuf,
    pub index: u32,
    pub total: u32,
    /// Number of bytes in this part
    pub size: u64,
}

impl Part {
    pub fn is_last(&self) -> bool {
        self.index == self.total
    }

    /// Caption shown next to the delivered file
    pub fn label(&self) -> String {
        format!("Part {}/{}", self.index, self.total)
    }
}

// ============================================================================
// Job Types
// ============================================================================

/// Read-only view of a queued download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    /// Requester that owns the job
    pub key: String,
    pub url: String,
    pub parts_delivered: u32,
    pub bytes_fetched: u64,
    pub queued_at: DateTime<Utc>,
}

/// Result of asking the registry to accept a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Accepted,
    AlreadyQueued,
    QueueFull,
}

impl Admission {
    /// Reply sent back to the requester
    pub fn reply_text(&self) -> &'static str {
        match self {
            Admission::Accepted => "✔️ Request added to the queue",
            Admission::AlreadyQueued => "❌ You already have a download in the queue",
            Admission::QueueFull => "❌ I'm too busy with too many downloads, try again later",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

// ============================================================================
// Intake Types
// ============================================================================

/// A message arriving from the routing layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Sender identity, e.g. an address
    pub sender: String,
    pub text: String,
    /// Group chats are ignored in filter mode
    #[serde(default)]
    pub is_group: bool,
}

impl IncomingMessage {
    pub fn direct(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            is_group: false,
        }
    }
}

/// How incoming messages become downloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Any private message that is a link gets downloaded
    #[default]
    Filter,
    /// Only `/download <url>` gets downloaded
    Command,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Filter => write!(f, "filter"),
            Mode::Command => write!(f, "command"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filter" => Ok(Mode::Filter),
            "command" => Ok(Mode::Command),
            other => Err(format!("Invalid mode: {} (expected filter or command)", other)),
        }
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Engine settings, read once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum total size of one download, in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Maximum size of one part, in bytes
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    /// Seconds between delivery cycles
    #[serde(default = "default_delay")]
    pub delay: u64,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Jobs advanced in parallel within one cycle (1 = one after another)
    #[serde(default = "default_cycle_concurrency")]
    pub cycle_concurrency: usize,
    /// Where part files are staged before delivery
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_part_size() -> u64 {
    DEFAULT_PART_SIZE
}

fn default_delay() -> u64 {
    DEFAULT_DELAY_SECS
}

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

fn default_cycle_concurrency() -> usize {
    1
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("splitdl")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            part_size: DEFAULT_PART_SIZE,
            delay: DEFAULT_DELAY_SECS,
            mode: Mode::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            cycle_concurrency: default_cycle_concurrency(),
            work_dir: default_work_dir(),
        }
    }
}

impl Settings {
    /// Check that the settings describe a usable engine
    pub fn validate(&self) -> Result<(), String> {
        if self.part_size == 0 {
            return Err("part_size must be greater than zero".to_string());
        }
        if self.part_size > self.max_size {
            return Err(format!(
                "part_size ({}) cannot exceed max_size ({})",
                self.part_size, self.max_size
            ));
        }
        // part indices are u32
        if self.max_size.div_ceil(self.part_size) > u64::from(u32::MAX) {
            return Err(format!(
                "part_size ({}) is too small for max_size ({})",
                self.part_size, self.max_size
            ));
        }
        if self.max_queue_size == 0 {
            return Err("max_queue_size must be greater than zero".to_string());
        }
        if self.cycle_concurrency == 0 {
            return Err("cycle_concurrency must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn delay_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delay)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Events emitted by the core to front ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    JobQueued {
        key: String,
        url: String,
    },
    PartDelivered {
        key: String,
        index: u32,
        total: u32,
        size: u64,
    },
    JobCompleted {
        key: String,
        parts: u32,
    },
    JobFailed {
        key: String,
        error: String,
    },
    CycleFinished {
        advanced: usize,
        elapsed_ms: u64,
    },
}
