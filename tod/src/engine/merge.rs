//! Smart merge
//!
//! Reconciles a partial LLM reply against the original file. The partial
//! payload is split into anchored hunks, each hunk is matched against the
//! best-scoring window of the original (same size ± 20%), and accepted
//! hunks replace their windows in descending position order. A merge only
//! succeeds when every hunk clears the similarity threshold and the result
//! passes bracket-balance and size validation.

use std::path::Path;

use similar::TextDiff;
use tracing::{debug, warn};

use crate::config::SmartMergeConfig;
use crate::error::{EngineError, EngineResult};

/// Extensions where a bracket-balance check is meaningful
const BALANCED_EXTS: &[&str] = &[
    "rs", "c", "h", "cpp", "hpp", "cc", "java", "js", "jsx", "ts", "tsx", "go", "json", "css", "kt", "scala",
];

/// What happened during a merge
#[derive(Debug, Clone, Default)]
pub struct MergeDiagnostics {
    /// Hunks found in the partial payload
    pub hunk_count: usize,

    /// Best window score per hunk, in hunk order
    pub best_scores: Vec<f64>,

    /// Non-fatal oddities (overlapping matches, skipped checks)
    pub warnings: Vec<String>,
}

/// Merge a partial payload onto the original file contents
pub fn smart_merge(
    path: &Path,
    original: &str,
    partial: &str,
    config: &SmartMergeConfig,
) -> EngineResult<(String, MergeDiagnostics)> {
    let orig_lines: Vec<&str> = original.lines().collect();
    let part_lines: Vec<&str> = partial.lines().collect();

    let hunks = split_hunks(&part_lines, config.context_lines);
    let mut diagnostics = MergeDiagnostics {
        hunk_count: hunks.len(),
        ..Default::default()
    };

    if hunks.is_empty() {
        return Err(EngineError::Validation("partial payload is empty".to_string()));
    }

    // Find the best window for every hunk before touching anything
    let mut matches: Vec<(usize, usize, (usize, usize))> = Vec::new();
    for (idx, &(hs, he)) in hunks.iter().enumerate() {
        let hunk = &part_lines[hs..he];
        let (score, start, width) = best_window(&orig_lines, hunk);
        diagnostics.best_scores.push(score);
        debug!(hunk = idx, score, start, width, "hunk matched");

        if score < config.threshold {
            warn!(hunk = idx, best = score, threshold = config.threshold, "similarity too low");
            return Err(EngineError::LowSimilarity { hunk: idx, best: score });
        }
        matches.push((start, width, (hs, he)));
    }

    for pair in matches.windows(2) {
        let (a_start, a_width, _) = pair[0];
        let (b_start, _, _) = pair[1];
        if b_start < a_start + a_width {
            diagnostics
                .warnings
                .push(format!("hunks matched overlapping regions at lines {} and {}", a_start + 1, b_start + 1));
        }
    }

    // Apply in descending position order so earlier edits don't shift later
    // offsets
    matches.sort_by(|a, b| b.0.cmp(&a.0));
    let mut merged_lines = orig_lines.clone();
    for (start, width, (hs, he)) in matches {
        merged_lines.splice(start..start + width, part_lines[hs..he].iter().copied());
    }

    let mut merged = merged_lines.join("\n");
    if original.ends_with('\n') {
        merged.push('\n');
    }

    validate(path, original, &merged, &mut diagnostics)?;
    Ok((merged, diagnostics))
}

/// Split into hunks: maximal non-blank runs, coalescing runs separated by
/// fewer than `context_lines` blank lines
fn split_hunks(lines: &[&str], context_lines: usize) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].trim().is_empty() {
            i += 1;
            continue;
        }
        let start = i;
        while i < lines.len() && !lines[i].trim().is_empty() {
            i += 1;
        }
        runs.push((start, i));
    }

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for run in runs {
        if let Some(last) = hunks.last_mut() {
            if run.0 - last.1 < context_lines {
                last.1 = run.1;
                continue;
            }
        }
        hunks.push(run);
    }
    hunks
}

/// Scan all windows of size hunk ± 20% for the best line-ratio match
fn best_window(orig: &[&str], hunk: &[&str]) -> (f64, usize, usize) {
    let h = hunk.len();
    let min_w = ((h * 4).div_ceil(5)).max(1);
    let max_w = ((h * 6) / 5).max(min_w);
    let hunk_text = hunk.join("\n");

    let mut best = (0.0f64, 0usize, 0usize);
    for width in min_w..=max_w.min(orig.len()) {
        for start in 0..=(orig.len() - width) {
            let window_text = orig[start..start + width].join("\n");
            let ratio = TextDiff::from_lines(window_text.as_str(), hunk_text.as_str()).ratio() as f64;
            if ratio > best.0 {
                best = (ratio, start, width);
            }
        }
    }
    best
}

fn validate(path: &Path, original: &str, merged: &str, diagnostics: &mut MergeDiagnostics) -> EngineResult<()> {
    // Size sanity: a merge should not shrink below a third or grow past 3x
    if !original.is_empty() {
        let lo = original.len() / 3;
        let hi = original.len().saturating_mul(3);
        if merged.len() < lo || merged.len() > hi {
            return Err(EngineError::Validation(format!(
                "merged size {} outside {}..{} bytes",
                merged.len(),
                lo,
                hi
            )));
        }
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if BALANCED_EXTS.contains(&ext) {
        if brackets_balanced(original) {
            if !brackets_balanced(merged) {
                return Err(EngineError::Validation("merged file has unbalanced brackets".to_string()));
            }
        } else {
            diagnostics
                .warnings
                .push("original already unbalanced, skipping bracket check".to_string());
        }
    }

    Ok(())
}

fn brackets_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => stack.push(ch),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}
