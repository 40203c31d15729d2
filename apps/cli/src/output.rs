//! Output formatting utilities

use crate::OutputFormat;
use serde::Serialize;

/// Print output in the specified format
pub fn print_output<T: Serialize + std::fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(value)?);
        }
        OutputFormat::Human => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Split a `serve` input line into sender and message text
pub fn parse_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let (sender, text) = line.split_once(char::is_whitespace)?;
    let text = text.trim();
    if sender.is_empty() || text.is_empty() {
        return None;
    }
    Some((sender, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_on_first_whitespace() {
        assert_eq!(
            parse_line("alice https://example.com/a b"),
            Some(("alice", "https://example.com/a b"))
        );
        assert_eq!(parse_line("  bob\t/download x "), Some(("bob", "/download x")));
        assert_eq!(parse_line("lonely"), None);
        assert_eq!(parse_line(""), None);
    }

    #[test]
    fn bytes_are_humanized() {
        assert!(format_bytes(512).contains('B'));
        assert!(format_bytes(20 * 1024 * 1024).starts_with("20"));
    }
}
