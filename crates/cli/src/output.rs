//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print `items` as a table, or print `raw` as JSON
pub fn print_table<T: Tabled, R: Serialize + ?Sized>(
    items: &[T],
    raw: &R,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(raw)?,
    }
    Ok(())
}

pub fn print_json<R: Serialize + ?Sized>(value: &R) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a cell red when its container was flagged
pub fn flag(text: &str, flagged: bool) -> String {
    if flagged {
        text.red().to_string()
    } else {
        text.to_string()
    }
}

/// Color a CPU percentage such as `"98.00%"` by load
pub fn color_cpu(cpu_perc: &str) -> String {
    let value = cpu_perc.trim().trim_end_matches('%').parse::<f64>().ok();
    match value {
        Some(v) if v >= 90.0 => cpu_perc.red().to_string(),
        Some(v) if v >= 50.0 => cpu_perc.yellow().to_string(),
        _ => cpu_perc.to_string(),
    }
}
