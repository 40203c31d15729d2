//! Delivery sink that files parts away on the local disk

use async_trait::async_trait;
use console::style;
use splitdl_core::{DeliverySink, SplitdlError};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Moves every delivered part into `root`, optionally one folder per
/// recipient, and echoes the accompanying text.
pub struct DirectorySink {
    root: PathBuf,
    per_recipient: bool,
    echo: bool,
}

impl DirectorySink {
    /// `<root>/<recipient>/<part>`
    pub fn outbox(root: PathBuf) -> Self {
        Self {
            root,
            per_recipient: true,
            echo: true,
        }
    }

    /// `<root>/<part>`, silent
    pub fn flat(root: PathBuf) -> Self {
        Self {
            root,
            per_recipient: false,
            echo: false,
        }
    }

    /// Print the delivery text for every call
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    fn target_dir(&self, recipient: &str) -> PathBuf {
        if self.per_recipient {
            self.root.join(sanitize(recipient))
        } else {
            self.root.clone()
        }
    }
}

#[async_trait]
impl DeliverySink for DirectorySink {
    async fn deliver(
        &self,
        recipient: &str,
        text: &str,
        file: Option<&Path>,
    ) -> Result<(), SplitdlError> {
        if let Some(file) = file {
            let dir = self.target_dir(recipient);
            fs::create_dir_all(&dir).await?;

            let name = file
                .file_name()
                .ok_or_else(|| SplitdlError::Delivery(format!("{} has no file name", file.display())))?;
            let dest = dir.join(name);

            // rename fails across filesystems
            if fs::rename(file, &dest).await.is_err() {
                fs::copy(file, &dest).await?;
            }
            debug!("Delivered {} to {}", file.display(), dest.display());
        }

        if self.echo {
            println!("{} {}: {}", style("→").cyan(), style(recipient).bold(), text);
        }
        Ok(())
    }
}

/// Keep recipient keys usable as a single path component
fn sanitize(recipient: &str) -> String {
    let name: String = recipient
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => name,
    }
}
