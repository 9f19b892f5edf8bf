//! Output formatting shared by CLI commands.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

/// Print data as pretty JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Truncate string to maximum length with ellipsis
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a horizontal separator line
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Print a table header followed by a separator
pub fn print_table_header(columns: &[(&str, usize)]) {
    println!();
    let header: Vec<String> = columns.iter().map(|(name, width)| format!("{:<width$}", name, width = width)).collect();
    println!("{}", header.join(" "));
    print_separator(columns.iter().map(|(_, w)| w + 1).sum::<usize>().saturating_sub(1));
}
