use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use similar::TextDiff;
use tempfile::NamedTempFile;

use crate::report::RunSummary;
use crate::rules::{RuleContext, RuleOutcome, RuleSet};
use crate::walker::{
    WalkEvent, WalkOptions, ensure_roots_exist, relative_to_root, walk_documents,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PatchOptions {
    pub dry_run: bool,
    pub show_diff: bool,
}

/// Run the rule catalog over every matching document. One document at a
/// time, to completion; no failure in one document aborts the batch, and
/// nothing is written unless the transformed text actually differs.
pub fn run_patch(
    walk: &WalkOptions,
    rules: &RuleSet,
    options: &PatchOptions,
) -> Result<RunSummary> {
    ensure_roots_exist(walk)?;

    let mut summary = RunSummary::default();
    for event in walk_documents(walk) {
        match event {
            WalkEvent::Failed { path, reason } => {
                summary.record_error(&display_path(&path), &reason);
            }
            WalkEvent::Document { root, path } => {
                process_document(&root, &path, rules, options, &mut summary);
            }
        }
    }
    Ok(summary)
}

fn process_document(
    root: &Path,
    path: &Path,
    rules: &RuleSet,
    options: &PatchOptions,
    summary: &mut RunSummary,
) {
    let relative = relative_to_root(root, path);
    let original = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            summary.record_error(&relative, &error.to_string());
            return;
        }
    };

    let context = RuleContext::from_relative_path(&relative);
    let patched = apply_rules(&original, rules, &context, &relative, summary);

    if patched == original {
        summary.record_unchanged();
        return;
    }

    if options.show_diff {
        summary.record_diff_preview(render_diff(&relative, &original, &patched));
    }
    if options.dry_run {
        summary.record_changed(&relative);
        return;
    }
    match write_atomic(path, &patched) {
        Ok(()) => summary.record_changed(&relative),
        Err(error) => summary.record_error(&relative, &format!("{error:#}")),
    }
}

/// Apply every rule in order. A rule whose structural anchor is missing is
/// skipped for this document and recorded; a rule whose second application
/// to its own output would change it again is discarded (drift guard), so
/// re-running a full catalog over an already-patched corpus stays a no-op.
pub fn apply_rules(
    original: &str,
    rules: &RuleSet,
    context: &RuleContext,
    relative: &str,
    summary: &mut RunSummary,
) -> String {
    let mut text = original.to_string();
    for rule in rules.rules() {
        let (patched, outcome) = rule.apply(&text, context);
        match outcome {
            RuleOutcome::Applied { .. } => {
                let (second, second_outcome) = rule.apply(&patched, context);
                let drifted =
                    matches!(second_outcome, RuleOutcome::Applied { .. }) && second != patched;
                if drifted {
                    summary.record_rule_skip(
                        relative,
                        &rule.name,
                        "not idempotent on this document; edit discarded",
                    );
                } else {
                    text = patched.into_owned();
                }
            }
            RuleOutcome::AnchorMissing => {
                summary.record_rule_skip(relative, &rule.name, "anchor missing");
            }
            RuleOutcome::NoMatch | RuleOutcome::AlreadyApplied => {}
        }
    }
    text
}

/// Replace a file's content without ever exposing a truncated document:
/// write to a temporary file in the same directory, then rename over the
/// target. A failure mid-write leaves the original untouched.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    temp.write_all(content.as_bytes())
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    temp.persist(path)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

fn render_diff(relative: &str, original: &str, patched: &str) -> String {
    let diff = TextDiff::from_lines(original, patched);
    format!(
        "--- {relative} ({})\n+++ {relative} ({})\n{}",
        short_hash(original),
        short_hash(patched),
        diff.unified_diff().context_radius(2),
    )
}

fn short_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
