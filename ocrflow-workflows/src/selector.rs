//! ABOUTME: Deterministic winning-run selection over the completed runs of a document
//! ABOUTME: Five ordered criteria with latency, cost, and run-id tie-breaks

use tracing::{debug, warn};

use ocrflow_config::SelectionStrategy;
use ocrflow_core::{Run, RunStatus};

/// Confidence floor for the all-pages criterion.
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Select the winning run among `runs` for a document with
/// `document_page_count` declared pages.
///
/// Criteria, first satisfied wins:
/// 1. confidence at or above threshold with all declared pages parsed,
///    highest confidence winning;
/// 2. most pages parsed with non-empty text (unique maximum), otherwise the
///    tied set is retained as the criterion-4 pool;
/// 3. at least one table and non-empty text, highest word count winning;
/// 4. the retained pool, or all runs with text, by highest word count;
/// 5. lowest latency among completed runs.
///
/// Ties everywhere break by lowest latency, then lowest cost, then lowest
/// run id, so the function is a pure, repeatable mapping of its inputs.
#[must_use]
pub fn select_best_run<'a>(
    runs: &'a [Run],
    document_page_count: Option<i64>,
    strategy: SelectionStrategy,
) -> Option<&'a Run> {
    if strategy != SelectionStrategy::HighestConfidence {
        warn!(
            ?strategy,
            "selection strategy not implemented, using highest_confidence policy"
        );
    }

    let completed: Vec<&Run> = runs
        .iter()
        .filter(|r| r.status == RunStatus::Completed)
        .collect();
    if completed.is_empty() {
        return None;
    }

    // Criterion 1: high confidence with every declared page parsed.
    if let Some(page_count) = document_page_count {
        let candidates: Vec<&Run> = completed
            .iter()
            .copied()
            .filter(|r| {
                r.confidence_or_zero() >= DEFAULT_CONFIDENCE_THRESHOLD
                    && r.pages_or_zero() == page_count
            })
            .collect();
        if let Some(best) = pick_max_by(&candidates, |r| r.confidence_or_zero()) {
            debug!(run_id = best.id, "selected by high confidence + all pages");
            return Some(best);
        }
    }

    // Criterion 2: most pages parsed with non-empty text.
    let with_pages: Vec<&Run> = completed
        .iter()
        .copied()
        .filter(|r| r.pages_or_zero() > 0 && r.words_or_zero() > 0)
        .collect();
    let mut page_pool: Vec<&Run> = Vec::new();
    if !with_pages.is_empty() {
        let max_pages = with_pages.iter().map(|r| r.pages_or_zero()).max().unwrap_or(0);
        page_pool = with_pages
            .iter()
            .copied()
            .filter(|r| r.pages_or_zero() == max_pages)
            .collect();
        if page_pool.len() == 1 {
            debug!(run_id = page_pool[0].id, "selected by unique max pages");
            return Some(page_pool[0]);
        }
    }

    // Criterion 3: tables present, highest word count.
    let with_tables: Vec<&Run> = completed
        .iter()
        .copied()
        .filter(|r| r.words_or_zero() > 0 && r.tables_or_zero() >= 1)
        .collect();
    if let Some(best) = pick_max_by(&with_tables, |r| r.words_or_zero() as f64) {
        debug!(run_id = best.id, "selected by tables + word count");
        return Some(best);
    }

    // Criterion 4: the criterion-2 tie pool if any, else all runs with text.
    let word_pool: Vec<&Run> = if page_pool.is_empty() {
        completed
            .iter()
            .copied()
            .filter(|r| r.words_or_zero() > 0)
            .collect()
    } else {
        page_pool
    };
    if let Some(best) = pick_max_by(&word_pool, |r| r.words_or_zero() as f64) {
        debug!(run_id = best.id, "selected by word count");
        return Some(best);
    }

    // Criterion 5: nothing produced text; fastest completed run.
    let best = completed
        .iter()
        .copied()
        .min_by(|a, b| tie_break_key(a).partial_cmp(&tie_break_key(b)).unwrap_or(std::cmp::Ordering::Equal))?;
    debug!(run_id = best.id, "selected by lowest latency fallback");
    Some(best)
}

/// Highest metric wins; ties break by latency, then cost, then run id.
fn pick_max_by<'a>(candidates: &[&'a Run], metric: impl Fn(&Run) -> f64) -> Option<&'a Run> {
    let best_metric = candidates
        .iter()
        .map(|r| metric(r))
        .fold(f64::NEG_INFINITY, f64::max);
    let tied: Vec<&Run> = candidates
        .iter()
        .copied()
        .filter(|r| metric(r) == best_metric)
        .collect();
    tied.into_iter().min_by(|a, b| {
        tie_break_key(a)
            .partial_cmp(&tie_break_key(b))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Lexicographic tie-break key: latency, cost, run id. Missing values
/// sort last.
fn tie_break_key(run: &Run) -> (f64, f64, i64) {
    (
        run.latency_ms.map_or(f64::INFINITY, |l| l as f64),
        run.cost_cents.unwrap_or(f64::INFINITY),
        run.id,
    )
}
