//! Version-insensitive URL normalization
//!
//! `https://github.com/o/r/releases/download/v1.2.3/tool-1.2.3-x64.exe`
//! becomes `https://github.com/o/r/releases/download/VERSION/tool-VERSION-x64.exe`.
//! Scheme, host, query string and fragment are left untouched.

use std::borrow::Cow;

use regex::Regex;

/// Replacement for version-shaped URL parts
pub const VERSION_PLACEHOLDER: &str = "VERSION";

pub struct UrlNormalizer {
    /// A whole path segment shaped like a version: `v1.2.3`, `2024`
    segment_re: Regex,
    /// A version suffix inside a segment: `-1.2.3` before `.`, `-`, `_` or the end
    suffix_re: Regex,
}

impl UrlNormalizer {
    pub fn new() -> Self {
        Self {
            segment_re: Regex::new(r"^v?\d+(?:\.\d+)*$").unwrap(),
            suffix_re: Regex::new(r"([-_])v?\d+(?:\.\d+)*([._-]|$)").unwrap(),
        }
    }

    /// Normalizes `url`. Applying it twice gives the same result as once.
    pub fn normalize(&self, url: &str) -> String {
        let (prefix, path, tail) = split_url(url);
        if path.is_empty() {
            return url.to_string();
        }

        let segments: Vec<&str> = path.split('/').collect();
        let last = segments.len() - 1;
        let normalized: Vec<Cow<'_, str>> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                if i < last && self.segment_re.is_match(segment) {
                    Cow::Borrowed(VERSION_PLACEHOLDER)
                } else {
                    self.strip_suffixes(segment)
                }
            })
            .collect();

        format!("{}{}{}", prefix, normalized.join("/"), tail)
    }

    // Adjacent suffixes share their separator, so one pass can leave a
    // second suffix behind; repeat until nothing changes.
    fn strip_suffixes<'a>(&self, segment: &'a str) -> Cow<'a, str> {
        let replacement = format!("${{1}}{}${{2}}", VERSION_PLACEHOLDER);
        let mut current = Cow::Borrowed(segment);
        loop {
            let next = match self.suffix_re.replace_all(&current, replacement.as_str()) {
                Cow::Borrowed(_) => None,
                Cow::Owned(next) => Some(next),
            };
            match next {
                Some(next) => current = Cow::Owned(next),
                None => return current,
            }
        }
    }
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits a URL into `scheme://host`, the path, and `?query#fragment`
fn split_url(url: &str) -> (&str, &str, &str) {
    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let rest = &url[authority_start..];

    let Some(offset) = rest.find(['/', '?', '#']) else {
        return (url, "", "");
    };
    let path_start = authority_start + offset;
    if !url[path_start..].starts_with('/') {
        return (&url[..path_start], "", &url[path_start..]);
    }

    let path_end = url[path_start..]
        .find(['?', '#'])
        .map(|i| path_start + i)
        .unwrap_or(url.len());

    (
        &url[..path_start],
        &url[path_start..path_end],
        &url[path_end..],
    )
}
