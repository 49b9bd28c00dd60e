//! Field normalization helpers
//!
//! Text folding, number parsing with Brazilian and international separators,
//! payment splitting and freight detection in the source message.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Trade terms recognised when pairing an Incoterm with a freight figure
pub const INCOTERMS: &[&str] = &[
    "EXW", "FCA", "FAS", "FOB", "CFR", "CIF", "CPT", "CIP", "DAP", "DPU", "DDP", "TPD",
];

/// Incoterms under which the buyer arranges freight
pub const BUYER_FREIGHT_INCOTERMS: [&str; 2] = ["FOB", "TPD"];

/// Words after a number that make it a quantity or a term, not a price
const NON_PRICE_UNITS: &[&str] = &[
    "t", "ton", "tons", "tonelada", "toneladas", "kg", "kgs", "sc", "saco", "sacos", "dia",
    "dias", "mes", "meses",
];

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref PAYMENT_METHOD: Regex = Regex::new(
        r"(?i)^\s*(boleto(?:\s+banc[aá]rio)?|pix|ted|doc|transfer[eê]ncia(?:\s+banc[aá]ria)?|dep[oó]sito(?:\s+banc[aá]rio)?|cart[aã]o(?:\s+de\s+cr[eé]dito)?|cheque|dinheiro)\b[\s,:;/-]*(.*)$"
    )
    .unwrap();
    static ref FREIGHT_LABEL: Regex =
        Regex::new(r"(?i)\b(?:frete|freight)\b[^\d\n]{0,20}(\d+(?:[.,]\d+)*)").unwrap();
    static ref INCOTERM_FIGURE: Regex = Regex::new(&format!(
        r"(?i)\b({})\b\s*[:=-]?\s*(?:R\$\s*)?(\d+(?:[.,]\d+)*)(?:\s*(\p{{L}}+))?",
        INCOTERMS.join("|")
    ))
    .unwrap();
    static ref NUMBER_TOKEN: Regex = Regex::new(r"\d+(?:[.,]\d+)*").unwrap();
    static ref INCOTERM_WORD: Regex =
        Regex::new(&format!(r"(?i)\b({})\b", INCOTERMS.join("|"))).unwrap();
    static ref TRAILING_UNIT: Regex =
        Regex::new(r"(?i)\s*(?:toneladas?|tons?|t|kg|reais|brl|/\s*t(?:on)?)\.?\s*$").unwrap();
}

/// Lowercase, strip accents, collapse whitespace.
pub fn fold_text(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

pub fn digits_only(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// Every number written in `text`, parsed with `parse_number`.
pub fn numbers_in_text(text: &str) -> Vec<f64> {
    NUMBER_TOKEN
        .find_iter(text)
        .filter_map(|m| parse_number(m.as_str()))
        .collect()
}

/// Whether folded `needle` occurs in folded `haystack` as whole words.
pub fn contains_phrase(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
    })
}

/// Parse a money or quantity string.
///
/// `2.200,50` and `2,200.50` both give 2200.5; a single dot followed by
/// exactly three digits (`1.500`) is a thousands separator.
pub fn parse_number(raw: &str) -> Option<f64> {
    let without_currency = raw.replace("R$", "").replace('$', "");
    let without_unit = TRAILING_UNIT.replace(without_currency.trim(), "");
    let cleaned: String = without_unit.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let dots = cleaned.matches('.').count();
    let commas = cleaned.matches(',').count();

    let normalized = if commas == 1 {
        let last_dot = cleaned.rfind('.');
        let comma = cleaned.rfind(',');
        if comma > last_dot {
            cleaned.replace('.', "").replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else if dots >= 1 && commas == 0 {
        let parts: Vec<&str> = cleaned.split('.').collect();
        let last = parts.last().copied().unwrap_or_default();
        if dots == 1 && last.len() == 3 && !parts[0].is_empty() {
            parts.concat()
        } else if last.len() < 3 {
            format!("{}.{}", parts[..parts.len() - 1].concat(), last)
        } else {
            parts.concat()
        }
    } else if dots == 0 && commas == 0 {
        cleaned
    } else if dots == 0 {
        // 1,200,000
        cleaned.replace(',', "")
    } else {
        cleaned.replace('.', "").replace(',', ".")
    };

    let parsed = normalized.parse::<f64>().ok();
    if parsed.is_none() {
        debug!("Could not parse '{}' as a number (normalized '{}')", raw, normalized);
    }
    parsed
}

/// Separate a payment method from a payment term written in the same value,
/// e.g. "Boleto 30 dias". Values already split are returned unchanged.
pub fn split_payment(
    method: Option<String>,
    term: Option<String>,
) -> (Option<String>, Option<String>) {
    let mut method = method;
    let mut term = term;

    if let Some(raw) = method.clone() {
        if let Some(caps) = PAYMENT_METHOD.captures(&raw) {
            let head = caps[1].trim().to_string();
            let rest = caps[2].trim().to_string();
            method = Some(head);
            if !rest.is_empty() && term.is_none() {
                term = Some(rest);
            }
        }
    }

    if let Some(raw) = term.clone() {
        if let Some(caps) = PAYMENT_METHOD.captures(&raw) {
            let head = caps[1].trim().to_string();
            let rest = caps[2].trim().to_string();
            if method.is_none() {
                method = Some(head);
            }
            term = if rest.is_empty() { None } else { Some(rest) };
        }
    }

    (method, term)
}

pub fn normalize_incoterm(raw: &str) -> Option<String> {
    INCOTERM_WORD
        .captures(raw)
        .map(|caps| caps[1].to_uppercase())
        .or_else(|| {
            let token = raw.split_whitespace().next()?.to_uppercase();
            if token.chars().all(|c| c.is_ascii_alphabetic()) {
                Some(token)
            } else {
                None
            }
        })
}

/// A freight figure the message states explicitly: a `frete`/`freight`
/// label, or an `<INCOTERM> <number>` pair for seller-paid Incoterms.
/// Returns the Incoterm when the figure came from such a pair.
pub fn freight_in_text(text: &str) -> Option<(Option<String>, f64)> {
    if let Some(caps) = FREIGHT_LABEL.captures(text) {
        if let Some(value) = parse_number(&caps[1]) {
            let incoterm = incoterm_figures(text).next().map(|(incoterm, _)| incoterm);
            return Some((incoterm, value));
        }
    }
    incoterm_figures(text)
        .find(|(incoterm, _)| !BUYER_FREIGHT_INCOTERMS.contains(&incoterm.as_str()))
        .map(|(incoterm, value)| (Some(incoterm), value))
}

/// `<INCOTERM> <number>` pairs whose number is not followed by a unit.
fn incoterm_figures(text: &str) -> impl Iterator<Item = (String, f64)> + '_ {
    INCOTERM_FIGURE.captures_iter(text).filter_map(|caps| {
        let unit = caps.get(3).map(|m| fold_text(m.as_str()));
        if unit.map_or(false, |u| NON_PRICE_UNITS.contains(&u.as_str())) {
            return None;
        }
        parse_number(&caps[2]).map(|value| (caps[1].to_uppercase(), value))
    })
}
