//! Structural classification of version strings
//!
//! A version pattern describes the *shape* of a version rather than its
//! value: `v1.2.3` and `4.10.0` share a shape up to digit counts, and
//! `2.0.0-beta.1` keeps its dev-stage marker. The classifier never fails;
//! anything it cannot describe yields [`UNKNOWN_PATTERN`].

use tracing::debug;

pub const UNKNOWN_PATTERN: &str = "unknown";

/// Dev-stage markers, checked by exact match first and then by containment
/// in this order.
const DEV_STAGES: &[&str] = &[
    "preview",
    "beta",
    "rc",
    "alpha",
    "dev",
    "snapshot",
    "milestone",
    "release",
    "final",
    "stable",
    "latest",
    "patch",
    "build",
    "hotfix",
    "candidate",
    "test",
    "unstable",
    "master",
    "pre",
    "esr",
    "lts",
    "longterm",
    "extended",
    "unsupported",
    "rel",
    "git",
    "rev",
    "major",
    "minor",
];

fn separator_name(c: char) -> Option<&'static str> {
    match c {
        '.' => Some("Dot"),
        '-' => Some("Dash"),
        '_' => Some("Underscore"),
        ' ' => Some("Space"),
        '(' => Some("OpenBrac"),
        ')' => Some("CloseBrac"),
        _ => None,
    }
}

fn dev_stage(word: &str) -> String {
    let lower = word.to_lowercase();

    if let Some(stage) = DEV_STAGES.iter().find(|stage| **stage == lower) {
        return (*stage).to_string();
    }
    if let Some(stage) = DEV_STAGES.iter().find(|stage| lower.contains(**stage)) {
        return (*stage).to_string();
    }

    format!("{}Letter", word.chars().count())
}

/// Splits a word at every digit/letter boundary.
fn split_digit_letter(word: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, c) in word.char_indices() {
        if let Some(p) = prev {
            let boundary = (p.is_ascii_digit() && c.is_alphabetic())
                || (p.is_alphabetic() && c.is_ascii_digit());
            if boundary {
                pieces.push(&word[start..i]);
                start = i;
            }
        }
        prev = Some(c);
    }
    if start < word.len() {
        pieces.push(&word[start..]);
    }

    pieces
}

fn classify_piece(piece: &str) -> Option<String> {
    let len = piece.chars().count();
    if piece.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{}Num", len))
    } else if piece.chars().all(char::is_alphabetic) {
        if len == 1 {
            Some("1Letter".to_string())
        } else {
            Some(dev_stage(piece))
        }
    } else {
        // Mixed pieces such as "3+build" carry no usable shape.
        None
    }
}

fn append_word(word: &str, parts: &mut Vec<String>) {
    parts.extend(split_digit_letter(word).into_iter().filter_map(classify_piece));
}

/// Returns the canonical shape of `raw`, e.g. `"1NumDot1NumDot1Num"` for `v1.2.3`.
pub fn classify(raw: &str) -> String {
    if raw.is_empty() {
        return UNKNOWN_PATTERN.to_string();
    }

    let version = raw
        .strip_prefix('v')
        .or_else(|| raw.strip_prefix('r'))
        .unwrap_or(raw);

    let mut parts: Vec<String> = Vec::new();
    let mut word_start = 0;

    for (i, c) in version.char_indices() {
        if let Some(name) = separator_name(c) {
            append_word(&version[word_start..i], &mut parts);
            parts.push(name.to_string());
            word_start = i + c.len_utf8();
        }
    }
    append_word(&version[word_start..], &mut parts);

    if parts.is_empty() {
        debug!("No pattern detected for version {:?}", raw);
        return UNKNOWN_PATTERN.to_string();
    }

    parts.concat()
}
