//! JSON-lines report of verdicts, catalog update commands and the run summary

use std::collections::BTreeMap;
use std::io::Write;

use serde::Serialize;
use tracing::{info, warn};

use crate::decision::{Outcome, Verdict};
use crate::error::RunError;
use crate::fetch::PrState;

/// One output line per package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub package_id: String,
    pub current_version: String,
    pub upstream_version: Option<String>,
    pub upstream_urls: Vec<String>,
    pub version_pattern: String,
    /// Comma-joined `arch-ext` pairs
    pub arch_ext_pairs: String,
    pub exact_match_count: usize,
    pub normalized_match_count: usize,
    pub pr_state: PrState,
    /// `proceed`, `rejected` or `error`
    pub outcome: &'static str,
    pub reason: String,
}

impl From<&Verdict> for ReportRow {
    fn from(verdict: &Verdict) -> Self {
        Self {
            package_id: verdict.package_id.clone(),
            current_version: verdict.current_version.clone(),
            upstream_version: verdict.upstream_version.clone(),
            upstream_urls: verdict.upstream_urls.clone(),
            version_pattern: verdict.version_pattern.clone(),
            arch_ext_pairs: verdict.arch_ext_pairs.join(","),
            exact_match_count: verdict.exact_match_count,
            normalized_match_count: verdict.normalized_match_count,
            pr_state: verdict.pr_state,
            outcome: verdict.outcome.label(),
            reason: verdict.outcome.reason(),
        }
    }
}

/// Writes one JSON object per verdict, newline separated
pub fn write_report<W: Write>(mut writer: W, verdicts: &[Verdict]) -> Result<(), RunError> {
    for verdict in verdicts {
        serde_json::to_writer(&mut writer, &ReportRow::from(verdict))?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// `komac update` command for a package that should be updated.
///
/// `None` unless the verdict is `proceed` with a known version and at least
/// one upstream URL. A leading `v`/`V` is stripped from the release tag.
pub fn update_command(verdict: &Verdict) -> Option<String> {
    if !verdict.is_proceed() {
        return None;
    }
    let version = verdict
        .upstream_version
        .as_deref()
        .map(|tag| tag.trim_start_matches(['v', 'V']))
        .filter(|version| !version.is_empty())?;
    if verdict.upstream_urls.is_empty() {
        return None;
    }

    Some(format!(
        "komac update {} --version {} --urls {}",
        verdict.package_id,
        version,
        verdict.upstream_urls.join(" ")
    ))
}

/// Writes one update command per `proceed` verdict and returns how many
/// were written
pub fn write_commands<W: Write>(mut writer: W, verdicts: &[Verdict]) -> Result<usize, RunError> {
    let mut written = 0;
    for verdict in verdicts.iter().filter(|v| v.is_proceed()) {
        match update_command(verdict) {
            Some(command) => {
                writeln!(writer, "{}", command)?;
                written += 1;
            }
            None => warn!("Skipping incomplete entry for {}", verdict.package_id),
        }
    }
    writer.flush()?;
    Ok(written)
}

/// Verdict counts per outcome and per reason
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub proceed: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub errors: BTreeMap<&'static str, usize>,
}

impl Summary {
    pub fn from_verdicts(verdicts: &[Verdict]) -> Self {
        verdicts.iter().fold(Self::default(), |mut summary, verdict| {
            summary.total += 1;
            match verdict.outcome {
                Outcome::Proceed => summary.proceed += 1,
                Outcome::Rejected(rule) => *summary.rejected.entry(rule.code()).or_default() += 1,
                Outcome::Error(kind) => *summary.errors.entry(kind.as_str()).or_default() += 1,
            }
            summary
        })
    }

    pub fn log(&self) {
        info!(
            "Run complete: {} packages, {} proceed, {} rejected, {} errors",
            self.total,
            self.proceed,
            self.rejected.values().sum::<usize>(),
            self.errors.values().sum::<usize>()
        );
        for (rule, count) in &self.rejected {
            info!("  {}: {}", rule, count);
        }
        for (kind, count) in &self.errors {
            info!("  error {}: {}", kind, count);
        }
    }
}
