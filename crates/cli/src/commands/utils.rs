use prettytable::{row, Table};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Two-column table of label/value pairs.
pub fn print_fields(fields: &[(&str, String)]) {
    let mut table = Table::new();
    for (label, value) in fields {
        table.add_row(row![b -> label, value]);
    }
    table.printstd();
}

/// Formats a wei amount as a decimal number of `unit`s with up to `precision` decimals.
pub fn format_units(wei: u128, decimals: u32, precision: usize) -> String {
    let scale = 10u128.pow(decimals);
    let whole = wei / scale;
    let fraction = wei % scale;
    if fraction == 0 || precision == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0width$}", width = decimals as usize);
    let trimmed = digits[..precision.min(digits.len())].trim_end_matches('0');
    if trimmed.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{trimmed}")
    }
}

pub fn format_eth(wei: u128) -> String {
    format!("{} ETH", format_units(wei, 18, 6))
}

pub fn format_gwei(wei: u128) -> String {
    format!("{} gwei", format_units(wei, 9, 3))
}
