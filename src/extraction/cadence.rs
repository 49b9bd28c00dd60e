//! Delivery cadence formatting
//!
//! Multi-line schedules are kept exactly as written. The compact inline form
//! (`40 fev 20 mar`) is expanded to one `MM.YYYY:qty ton` line per month.

use crate::extraction::normalize::{fold_text, parse_number};
use chrono::{Datelike, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    static ref COMPACT_ITEM: Regex =
        Regex::new(r"(\d[\d.,]*)\s*(?:toneladas|tons?|t)?\s*([a-z]+)").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"(?:[\s,;+/-]|\be\b|\band\b)+").unwrap();
}

/// Month number for Portuguese or English names and abbreviations (folded).
pub fn month_number(name: &str) -> Option<u32> {
    let month = match name {
        "jan" | "janeiro" | "january" => 1,
        "fev" | "feb" | "fevereiro" | "february" => 2,
        "mar" | "marco" | "march" => 3,
        "abr" | "apr" | "abril" | "april" => 4,
        "mai" | "may" | "maio" => 5,
        "jun" | "junho" | "june" => 6,
        "jul" | "julho" | "july" => 7,
        "ago" | "aug" | "agosto" | "august" => 8,
        "set" | "sep" | "sept" | "setembro" | "september" => 9,
        "out" | "oct" | "outubro" | "october" => 10,
        "nov" | "novembro" | "november" => 11,
        "dez" | "dec" | "dezembro" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

/// Year the schedule refers to: the negotiation date's year when it parses
/// as `dd/mm/yyyy` (or `dd/mm/yy`), otherwise the reference date's year.
pub fn cadence_year(negotiation_date: Option<&str>, reference_date: NaiveDate) -> i32 {
    negotiation_date
        .and_then(negotiation_year)
        .unwrap_or_else(|| reference_date.year())
}

fn negotiation_year(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date.year());
    }

    let parts: Vec<&str> = raw.split('/').map(str::trim).collect();
    if parts.len() != 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let year: i32 = match parts[2].len() {
        2 => 2000 + parts[2].parse::<i32>().ok()?,
        4 => parts[2].parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.year())
}

/// Format a cadence value for the order.
pub fn format_cadence(raw: &str, year: i32) -> String {
    let trimmed = raw.trim();
    let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() > 1 {
        return trimmed.to_string();
    }

    match expand_compact(trimmed, year) {
        Some(expanded) => expanded,
        None => trimmed.to_string(),
    }
}

/// Expand `qty month qty month ...`. Returns `None` unless the whole line is
/// made of such pairs.
fn expand_compact(line: &str, year: i32) -> Option<String> {
    let folded = fold_text(line);

    let mut items = Vec::new();
    let mut consumed_until = 0;
    for caps in COMPACT_ITEM.captures_iter(&folded) {
        let whole = caps.get(0)?;
        if !is_only_separators(&folded[consumed_until..whole.start()]) {
            return None;
        }
        let quantity = parse_number(&caps[1])?;
        let month = month_number(&caps[2])?;
        items.push((month, quantity));
        consumed_until = whole.end();
    }
    if items.is_empty() || !is_only_separators(&folded[consumed_until..]) {
        return None;
    }

    let mut year = year;
    let mut previous_month = 0;
    let mut lines = Vec::with_capacity(items.len());
    for (month, quantity) in items {
        if month < previous_month {
            year += 1;
        }
        previous_month = month;
        lines.push(format!("{:02}.{}:{} ton", month, year, format_quantity(quantity)));
    }

    debug!("Expanded compact cadence '{}' into {} lines", line, lines.len());
    Some(lines.join("\n"))
}

fn is_only_separators(text: &str) -> bool {
    text.is_empty() || SEPARATORS.replace_all(text, "").is_empty()
}

fn format_quantity(quantity: f64) -> String {
    if quantity.fract() == 0.0 {
        format!("{}", quantity as i64)
    } else {
        format!("{}", quantity)
    }
}
