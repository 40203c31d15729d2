//! Turns incoming messages into download requests

use splitdl_types::{IncomingMessage, Mode};

/// Command verb accepted in command mode
pub const DOWNLOAD_COMMAND: &str = "/download";

/// URL to download for `message`, if it asks for one under `mode`.
///
/// Filter mode takes any private message that starts with an http(s)
/// scheme. Command mode takes the argument of `/download <url>`.
pub fn extract_url(mode: Mode, message: &IncomingMessage) -> Option<String> {
    let text = message.text.trim();

    match mode {
        Mode::Filter => {
            if message.is_group || !has_http_scheme(text) {
                return None;
            }
            Some(text.to_string())
        }
        Mode::Command => {
            let mut words = text.split_whitespace();
            let verb = words.next()?;
            // tolerate "/download@botname"
            if verb != DOWNLOAD_COMMAND && !verb.starts_with("/download@") {
                return None;
            }
            words.next().map(str::to_string)
        }
    }
}

fn has_http_scheme(text: &str) -> bool {
    let lower = text.get(..8).unwrap_or(text).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
