//! Progress bar for `fetch`

use crate::output::format_bytes;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use splitdl_types::CoreEvent;

/// Tracks the parts of a single job
pub struct PartProgress {
    key: String,
    bar: ProgressBar,
    bytes: u64,
    parts: u32,
    error: Option<String>,
}

impl PartProgress {
    pub fn new(key: &str, url: &str, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };

        let template = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} parts {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  ");
        bar.set_style(template);
        bar.set_message(url.to_string());

        Self {
            key: key.to_string(),
            bar,
            bytes: 0,
            parts: 0,
            error: None,
        }
    }

    /// Update from a core event. Returns true once the job is gone.
    pub fn handle_event(&mut self, event: &CoreEvent) -> bool {
        match event {
            CoreEvent::PartDelivered {
                key,
                index,
                total,
                size,
            } if *key == self.key => {
                self.bytes += size;
                self.parts = *index;
                self.bar.set_length(u64::from(*total));
                self.bar.set_position(u64::from(*index));
                self.bar.set_message(format_bytes(self.bytes));
                false
            }

            CoreEvent::JobCompleted { key, parts } if *key == self.key => {
                self.parts = *parts;
                self.bar.finish_with_message(format!(
                    "{} {} in {} part(s)",
                    style("✓").green().bold(),
                    format_bytes(self.bytes),
                    parts
                ));
                true
            }

            CoreEvent::JobFailed { key, error } if *key == self.key => {
                self.bar.abandon_with_message(format!(
                    "{} Failed: {}",
                    style("✗").red().bold(),
                    error
                ));
                self.error = Some(error.clone());
                true
            }

            _ => false,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn parts(&self) -> u32 {
        self.parts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_own_job_is_tracked() {
        let mut progress = PartProgress::new("local", "https://example.com/f", false);

        let other = CoreEvent::JobCompleted {
            key: "someone".into(),
            parts: 4,
        };
        assert!(!progress.handle_event(&other));

        let part = CoreEvent::PartDelivered {
            key: "local".into(),
            index: 1,
            total: 2,
            size: 10,
        };
        assert!(!progress.handle_event(&part));

        let failed = CoreEvent::JobFailed {
            key: "local".into(),
            error: "boom".into(),
        };
        assert!(progress.handle_event(&failed));
        assert_eq!(progress.bytes(), 10);
        assert_eq!(progress.parts(), 1);
        assert_eq!(progress.error(), Some("boom"));
    }
}
