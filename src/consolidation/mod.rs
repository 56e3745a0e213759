//! Consolidation: fold records past an age threshold into one aggregate
//! ("mega-summary") record of a few bullet points.
//!
//! Bullets come from a [`Summarizer`] when one is configured and produces
//! usable output, otherwise from [`frequency_summary`]. Consolidated records
//! are left in place; every run re-reads the whole store.

#[cfg(feature = "llama")]
mod llama;

#[cfg(feature = "llama")]
pub use llama::LlamaSummarizer;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::storage::RecordStore;
use crate::types::{ConsolidationConfig, ConsolidationReport, Record};

/// Maximum number of bullets in an aggregate record.
pub const MAX_BULLETS: usize = 3;

/// Number of ranked terms considered by the frequency summary.
const TOP_TERMS: usize = 5;

/// Terms named in the headline bullet.
const HEADLINE_TERMS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "of", "to", "a", "an", "in", "for", "on", "with", "is", "this",
];

pub const SUMMARY_PROMPT: &str = "Summarize these style rules into 3 concise bullet points:\n";

/// Model-backed summarization of record descriptions.
pub trait Summarizer {
    /// Free-form model output for `descriptions`; bullets are extracted by
    /// the caller.
    fn summarize(&self, descriptions: &[&str]) -> Result<String, crate::Error>;
}

/// Summarizer for `config.model_path`, if one is set and loads.
pub fn load_model_summarizer(config: &ConsolidationConfig) -> Option<Box<dyn Summarizer>> {
    let path = config.model_path.as_deref()?;
    if !path.exists() {
        tracing::warn!(
            "Summarization model {} not found, using frequency summary",
            path.display()
        );
        return None;
    }

    #[cfg(feature = "llama")]
    {
        match LlamaSummarizer::load(path) {
            Ok(summarizer) => Some(Box::new(summarizer)),
            Err(e) => {
                tracing::warn!(
                    "Failed to load summarization model {}: {}. Using frequency summary.",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    #[cfg(not(feature = "llama"))]
    {
        tracing::info!(
            "llama support not compiled in, ignoring model {}",
            path.display()
        );
        None
    }
}

/// Bullet lines of model output: non-empty lines with leading bullet markers
/// removed, at most [`MAX_BULLETS`].
pub fn parse_bullets(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(['-', '•', '*', ' '])
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_BULLETS)
        .collect()
}

/// Occurrence counts in first-seen order.
fn counted<I, S>(items: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for item in items {
        match counts.entry(item.into()) {
            Entry::Occupied(mut slot) => *slot.get_mut() += 1,
            Entry::Vacant(slot) => {
                order.push(slot.key().clone());
                slot.insert(1);
            }
        }
    }

    order
        .into_iter()
        .map(|item| {
            let count = counts.get(&item).copied().unwrap_or_default();
            (item, count)
        })
        .collect()
}

/// Most frequent first; equal counts keep first-seen order.
fn ranked<I, S>(items: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ranked = counted(items);
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

fn terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().filter_map(|word| {
        let cleaned: String = word
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        (!cleaned.is_empty() && !STOP_WORDS.contains(&cleaned.as_str())).then_some(cleaned)
    })
}

/// Deterministic summary of `records`: the record count with the most
/// frequent terms, further frequent terms when there are any, and the count
/// of records per `type`.
pub fn frequency_summary(records: &[&Record]) -> Vec<String> {
    let common: Vec<String> = ranked(records.iter().flat_map(|r| terms(r.summary_text())))
        .into_iter()
        .take(TOP_TERMS)
        .map(|(term, _)| term)
        .collect();

    let mut bullets = Vec::with_capacity(MAX_BULLETS);

    let headline = &common[..common.len().min(HEADLINE_TERMS)];
    if headline.is_empty() {
        bullets.push(format!("{} archived records summarised.", records.len()));
    } else {
        bullets.push(format!(
            "{} archived records summarised covering {}.",
            records.len(),
            headline.join(", ")
        ));
    }

    if common.len() > HEADLINE_TERMS {
        bullets.push(format!(
            "Additional themes include: {}.",
            common[HEADLINE_TERMS..].join(", ")
        ));
    }

    let types = counted(
        records
            .iter()
            .map(|r| r.record_type.as_deref().unwrap_or("unknown")),
    );
    bullets.push(format!(
        "Record types: {}.",
        types
            .iter()
            .map(|(name, count)| format!("{count} {name}"))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    bullets
}

/// Whole days from `timestamp` to `now`, rounded down. A record dated in the
/// future is a negative number of days old.
fn age_in_days(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> i64 {
    (now - timestamp).num_seconds().div_euclid(86_400)
}

/// Scan `store`, and when any ordinary record is at least `threshold_days`
/// old as of `now`, persist one aggregate record summarizing all of them.
///
/// Without old records nothing is written.
pub fn consolidate(
    store: &dyn RecordStore,
    threshold_days: i64,
    summarizer: Option<&dyn Summarizer>,
    now: DateTime<Utc>,
) -> Result<ConsolidationReport, crate::Error> {
    let records = store.load_all()?;
    let mut report = ConsolidationReport::default();

    let mut old: Vec<&Record> = Vec::new();
    for record in &records {
        match record.timestamp() {
            Some(timestamp) if age_in_days(now, timestamp) >= threshold_days => old.push(record),
            Some(_) => report.recent += 1,
            None => report.undated += 1,
        }
    }
    report.old = old.len();

    if old.is_empty() {
        tracing::info!("No records older than {} days, nothing to consolidate", threshold_days);
        return Ok(report);
    }

    let mut bullets = Vec::new();
    if let Some(summarizer) = summarizer {
        let descriptions: Vec<&str> = old.iter().map(|r| r.summary_text()).collect();
        match summarizer.summarize(&descriptions) {
            Ok(text) => bullets = parse_bullets(&text),
            Err(e) => tracing::warn!("Model summarization failed: {}", e),
        }
        report.used_model = !bullets.is_empty();
    }

    if bullets.is_empty() {
        bullets = frequency_summary(&old);
    }

    let aggregate = Record::aggregate(now, bullets);
    store.persist(std::slice::from_ref(&aggregate))?;

    tracing::info!(
        "Consolidated {} records into {}",
        report.old,
        aggregate.id.as_deref().unwrap_or_default()
    );

    report.aggregate = Some(aggregate);
    Ok(report)
}
