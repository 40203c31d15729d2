//! CLI command implementations

use crate::output::{format_bytes, parse_line, print_output};
use crate::progress::PartProgress;
use crate::sink::DirectorySink;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use serde::Serialize;
use splitdl_core::{SplitdlCore, Storage};
use splitdl_types::{Admission, IncomingMessage, Settings};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Requester key used by `fetch`
const LOCAL_KEY: &str = "local";

// ============================================================================
// Serve
// ============================================================================

#[derive(Serialize)]
struct Reply {
    sender: String,
    admission: Admission,
    text: &'static str,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", style("←").dim(), style(&self.sender).bold(), self.text)
    }
}

pub async fn serve(storage: &Storage, outbox: PathBuf, format: OutputFormat) -> Result<()> {
    let settings = storage.load_settings().await?;
    let core = SplitdlCore::new(settings)?;
    let json = matches!(format, OutputFormat::Json);

    let sink = DirectorySink::outbox(outbox.clone()).with_echo(!json);
    let cancel = CancellationToken::new();
    let mut events = core.subscribe();
    let delivery = core.start_delivery(Arc::new(sink), cancel.clone());

    if !json {
        println!(
            "{} Serving in {} mode, parts go to {}",
            style("✓").green().bold(),
            style(core.settings().mode).cyan(),
            outbox.display()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => handle_line(&core, &line, format)?,
                None => {
                    stdin_open = false;
                    if core.registry().is_empty() {
                        break;
                    }
                }
            },

            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    // input is exhausted, stop once everything was delivered
                    if !stdin_open && core.registry().is_empty() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Skipped {} events", missed),
                Err(RecvError::Closed) => break,
            },
        }
    }

    cancel.cancel();
    delivery.await?;
    Ok(())
}

fn handle_line(core: &SplitdlCore, line: &str, format: OutputFormat) -> Result<()> {
    let Some((sender, text)) = parse_line(line) else {
        debug!("Ignoring malformed line: {:?}", line);
        return Ok(());
    };

    let message = IncomingMessage::direct(sender, text);
    match core.handle_message(&message) {
        Some(admission) => print_output(
            &Reply {
                sender: sender.to_string(),
                admission,
                text: admission.reply_text(),
            },
            format,
        ),
        None => {
            debug!("Message from {} is not a download request", sender);
            Ok(())
        }
    }
}

// ============================================================================
// Fetch
// ============================================================================

#[derive(Serialize)]
struct FetchSummary {
    url: String,
    parts: u32,
    bytes: u64,
    output: PathBuf,
}

impl fmt::Display for FetchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Saved {} part(s), {} to {}",
            style("✓").green().bold(),
            self.parts,
            format_bytes(self.bytes),
            self.output.display()
        )
    }
}

pub async fn fetch(
    storage: &Storage,
    url: &str,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let settings = storage.load_settings().await?;
    let core = SplitdlCore::new(settings)?;
    let output = match output {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let mut events = core.subscribe();
    let delivery = core.delivery_loop(Arc::new(DirectorySink::flat(output.clone())));

    let admission = core.enqueue(LOCAL_KEY, url);
    if !admission.is_accepted() {
        return Err(anyhow!("{}", admission.reply_text()));
    }

    let mut progress = PartProgress::new(LOCAL_KEY, url, matches!(format, OutputFormat::Human));
    let mut done = false;

    // a single local job has nothing to be paced against
    while !done && core.registry().contains(LOCAL_KEY) {
        delivery.run_cycle().await;
        loop {
            match events.try_recv() {
                Ok(event) => done |= progress.handle_event(&event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    }

    if let Some(error) = progress.error() {
        return Err(anyhow!("Download failed: {}", error));
    }

    print_output(
        &FetchSummary {
            url: url.to_string(),
            parts: progress.parts(),
            bytes: progress.bytes(),
            output,
        },
        format,
    )
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    storage: &Storage,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = storage.load_settings().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                OutputFormat::Human => {
                    println!("splitdl Configuration:");
                    println!();
                    println!("  Max download size: {}", format_bytes(settings.max_size));
                    println!("  Part size: {}", format_bytes(settings.part_size));
                    println!("  Delay between cycles: {}s", settings.delay);
                    println!("  Mode: {}", settings.mode);
                    println!("  Max queue size: {}", settings.max_queue_size);
                    println!("  Cycle concurrency: {}", settings.cycle_concurrency);
                    println!("  Work directory: {}", settings.work_dir.display());
                    println!();
                    println!("  Stored at {}", storage.settings_path().display());
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = storage.load_settings().await?;
            println!("{}", get_value(&settings, &key)?);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = storage.load_settings().await?;
            set_value(&mut settings, &key, &value)?;
            storage.save_settings(&settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                storage.reset_settings().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

fn get_value(settings: &Settings, key: &str) -> Result<String> {
    let value = match key {
        "max_size" => settings.max_size.to_string(),
        "part_size" => settings.part_size.to_string(),
        "delay" => settings.delay.to_string(),
        "mode" => settings.mode.to_string(),
        "max_queue_size" => settings.max_queue_size.to_string(),
        "cycle_concurrency" => settings.cycle_concurrency.to_string(),
        "work_dir" => settings.work_dir.display().to_string(),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    };
    Ok(value)
}

fn set_value(settings: &mut Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "max_size" => settings.max_size = value.parse()?,
        "part_size" => settings.part_size = value.parse()?,
        "delay" => settings.delay = value.parse()?,
        "mode" => settings.mode = value.parse().map_err(|e: String| anyhow!(e))?,
        "max_queue_size" => settings.max_queue_size = value.parse()?,
        "cycle_concurrency" => settings.cycle_concurrency = value.parse()?,
        "work_dir" => settings.work_dir = PathBuf::from(value),
        _ => return Err(anyhow!("Unknown config key: {}", key)),
    }
    Ok(())
}
