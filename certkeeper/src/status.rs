//! `status` command: what is cached and what the next batch would renew

use console::style;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::cache::{CacheError, CredentialCache};
use crate::config::{CertDescriptor, DescriptorSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Expiry {
    Missing,
    Unreadable,
    At(SystemTime),
}

#[derive(Debug, Clone)]
pub struct StatusRow {
    pub common_name: String,
    pub output: PathBuf,
    pub expiry: Expiry,
    pub days_left: Option<i64>,
    pub due: bool,
}

/// Build one row per descriptor from the cache alone.
pub fn collect(
    cache: &CredentialCache,
    descriptors: &[CertDescriptor],
    now: SystemTime,
) -> Vec<StatusRow> {
    descriptors
        .iter()
        .map(|descriptor| {
            let (expiry, days_left) = match cache.load_certificate(&descriptor.common_name) {
                Ok(cached) => (
                    Expiry::At(cached.not_after),
                    Some(cached.days_until_expiry(now)),
                ),
                Err(CacheError::NotFound(_)) => (Expiry::Missing, None),
                Err(_) => (Expiry::Unreadable, None),
            };

            StatusRow {
                common_name: descriptor.common_name.clone(),
                output: descriptor.output_path().to_path_buf(),
                expiry,
                days_left,
                due: cache.check(descriptor, now).is_due(),
            }
        })
        .collect()
}

fn expiry_text(expiry: &Expiry) -> String {
    match expiry {
        Expiry::Missing => "missing".to_string(),
        Expiry::Unreadable => "unreadable".to_string(),
        Expiry::At(not_after) => humantime::format_rfc3339_seconds(*not_after).to_string(),
    }
}

/// Aligned table of `rows`, followed by the files that failed to load.
pub fn render(rows: &[StatusRow], failures: &[(PathBuf, String)]) -> String {
    const HEADERS: [&str; 5] = ["COMMON NAME", "OUTPUT", "NOT AFTER", "DAYS", "RENEWAL"];

    let cells: Vec<[String; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.common_name.clone(),
                row.output.display().to_string(),
                expiry_text(&row.expiry),
                row.days_left.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                if row.due { "due" } else { "ok" }.to_string(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header = HEADERS
        .iter()
        .zip(widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", style(header.trim_end()).bold());

    for (row, status) in cells.iter().zip(rows) {
        let padded: Vec<String> = row
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        let renewal = if status.due {
            style(padded[4].trim_end()).yellow()
        } else {
            style(padded[4].trim_end()).green()
        };
        let expiry = match status.expiry {
            Expiry::At(_) => style(padded[2].as_str()),
            _ => style(padded[2].as_str()).red(),
        };
        let _ = writeln!(
            out,
            "{}  {}  {}  {}  {}",
            style(&padded[0]).cyan(),
            padded[1],
            expiry,
            padded[3],
            renewal
        );
    }

    if rows.is_empty() {
        let _ = writeln!(out, "{}", style("No certificates configured").dim());
    }

    for (path, error) in failures {
        let _ = writeln!(
            out,
            "{} {}: {}",
            style("error").red(),
            path.display(),
            error
        );
    }

    out
}

/// Print the report for a loaded descriptor set to stdout.
pub fn print_report(cache: &CredentialCache, set: &DescriptorSet) {
    let rows = collect(cache, &set.descriptors, SystemTime::now());
    let failures: Vec<(PathBuf, String)> = set
        .failures
        .iter()
        .map(|(path, e)| (path.clone(), e.to_string()))
        .collect();
    print!("{}", render(&rows, &failures));
}
