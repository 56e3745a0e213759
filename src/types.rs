use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::{
    AGGREGATE_SUFFIX, AGGREGATE_TYPE, DEFAULT_MODEL_ID, DEFAULT_THRESHOLD_DAYS, INDICES_SUBDIR,
    LLAMA_MODEL_ENV, MEMORY_SUBDIR, UNKNOWN_DATE_PREFIX,
};

/// One stored memory record.
///
/// The well-known fields are typed; anything else in the JSON object is kept
/// in `extra` so a record written back to disk keeps its original fields.
/// Absent fields stay absent on serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Bullet list for aggregate records; free-form for ordinary ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Build the aggregate record for a consolidation run at `now`.
    pub fn aggregate(now: DateTime<Utc>, bullets: Vec<String>) -> Self {
        let id = format!("{}_{AGGREGATE_SUFFIX}", now.date_naive());
        Self {
            id: Some(id),
            record_type: Some(AGGREGATE_TYPE.to_string()),
            date: Some(now.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            content: Some(Value::Array(bullets.into_iter().map(Value::String).collect())),
            ..Self::default()
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.record_type.as_deref() == Some(AGGREGATE_TYPE)
    }

    pub fn tags(&self) -> &[String] {
        self.tags.as_deref().unwrap_or_default()
    }

    /// Text fed to the embedding provider: name, description and tags, in
    /// that order, each empty when absent.
    pub fn embedding_text(&self) -> String {
        format!(
            "{}. {} {}",
            self.name.as_deref().unwrap_or_default(),
            self.description.as_deref().unwrap_or_default(),
            self.tags().join(" ")
        )
    }

    /// First 10 characters of `date`, or `unknown` when it is absent or empty.
    pub fn date_prefix(&self) -> String {
        match self.date.as_deref() {
            Some(date) if !date.is_empty() => date.chars().take(10).collect(),
            _ => UNKNOWN_DATE_PREFIX.to_string(),
        }
    }

    /// Canonical on-disk name `<date-prefix>_<id>.json`.
    ///
    /// `fallback_stem` stands in for a missing `id`, normally the stem of the
    /// file the record was read from. Aggregate records are named after
    /// their id alone.
    pub fn canonical_filename(&self, fallback_stem: &str) -> String {
        let id = self.id.as_deref().unwrap_or(fallback_stem);
        if self.is_aggregate() {
            return format!("{id}.json");
        }
        format!("{}_{id}.json", self.date_prefix())
    }

    /// `date` parsed as an instant in UTC. Naive timestamps are taken as UTC.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.date.as_deref().and_then(parse_timestamp)
    }

    pub fn shares_tag_with(&self, filter: &HashSet<&str>) -> bool {
        self.tags().iter().any(|tag| filter.contains(tag.as_str()))
    }

    /// Text summarized by consolidation: `description`, else a string `content`.
    pub fn summary_text(&self) -> &str {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => description,
            _ => self
                .content
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default(),
        }
    }

    /// Bullet strings of an aggregate record.
    pub fn bullets(&self) -> Vec<&str> {
        match self.content.as_ref() {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// A record file as found on disk.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub file_name: String,
    pub record: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Position of the record in the index.
    pub position: usize,
    /// Euclidean distance between the query and the record embedding.
    pub distance: f32,
    pub record: Record,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub indexed: usize,
    pub renamed: usize,
    /// Records that could not be embedded.
    pub skipped: usize,
    pub dimension: usize,
    pub embedder: String,
    pub native_index: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub old: usize,
    pub recent: usize,
    /// Records without a parseable `date`.
    pub undated: usize,
    pub used_model: bool,
    pub aggregate: Option<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    /// Minimum age in days for a record to be consolidated.
    pub threshold_days: i64,
    /// Local GGUF model used for summarization; `None` selects the
    /// frequency-based summary.
    pub model_path: Option<PathBuf>,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            threshold_days: DEFAULT_THRESHOLD_DAYS,
            model_path: None,
        }
    }
}

impl ConsolidationConfig {
    /// Defaults, with `model_path` taken from `LLAMA_MODEL_PATH` when set.
    pub fn from_env() -> Self {
        let model_path = std::env::var_os(LLAMA_MODEL_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self {
            model_path,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory of record files.
    pub memory_dir: PathBuf,
    /// Directory of index artifacts.
    pub indices_dir: PathBuf,
    /// HuggingFace model ID for the model2vec embedding model. `None` (or a
    /// model that fails to load) selects the hash embedder.
    pub model_id: Option<String>,
    /// Use the SIMD flat index when compiled in.
    pub accelerated_search: bool,
    pub consolidation: ConsolidationConfig,
}

impl Config {
    /// Layout rooted at `base`: `base/memory` and `base/indices`. The
    /// summarization model comes from the environment.
    pub fn new(base: &Path) -> Self {
        Self {
            memory_dir: base.join(MEMORY_SUBDIR),
            indices_dir: base.join(INDICES_SUBDIR),
            model_id: Some(DEFAULT_MODEL_ID.to_string()),
            accelerated_search: true,
            consolidation: ConsolidationConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(json: serde_json::Value) -> Record {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_canonical_filename_uses_date_prefix_and_id() {
        let rec = record(serde_json::json!({"id": "tabs", "date": "2024-03-05T10:11:12Z"}));
        assert_eq!(rec.canonical_filename("whatever"), "2024-03-05_tabs.json");
    }

    #[test]
    fn test_canonical_filename_without_date_or_id() {
        let rec = record(serde_json::json!({"name": "n"}));
        assert_eq!(rec.canonical_filename("note"), "unknown_note.json");

        let rec = record(serde_json::json!({"id": "x", "date": ""}));
        assert_eq!(rec.canonical_filename("note"), "unknown_x.json");
    }

    #[test]
    fn test_embedding_text_order() {
        let rec = record(serde_json::json!({
            "tags": ["a", "b"],
            "description": "desc",
            "name": "Name"
        }));
        assert_eq!(rec.embedding_text(), "Name. desc a b");
        assert_eq!(Record::default().embedding_text(), ".  ");
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "id": "a",
            "type": "style",
            "priority": 3,
            "meta": {"source": "chat"}
        });
        let rec = record(raw.clone());
        assert_eq!(rec.record_type.as_deref(), Some("style"));
        assert_eq!(serde_json::to_value(&rec).unwrap(), raw);
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for raw in [
            "2024-01-01",
            "2024-01-01T00:00:00",
            "2024-01-01T00:00:00Z",
            "2024-01-01T02:00:00+02:00",
            "2024-01-01T00:00:00.000",
        ] {
            let rec = Record {
                date: Some(raw.to_string()),
                ..Record::default()
            };
            assert_eq!(rec.timestamp(), Some(expected), "{raw}");
        }

        let rec = Record {
            date: Some("last tuesday".to_string()),
            ..Record::default()
        };
        assert_eq!(rec.timestamp(), None);
    }

    #[test]
    fn test_aggregate_record_shape() {
        let now = Utc.with_ymd_and_hms(2024, 7, 2, 8, 30, 15).unwrap();
        let agg = Record::aggregate(now, vec!["one".into(), "two".into()]);
        assert!(agg.is_aggregate());
        assert_eq!(agg.id.as_deref(), Some("2024-07-02_legacy-summary"));
        assert_eq!(agg.date.as_deref(), Some("2024-07-02T08:30:15Z"));
        assert_eq!(agg.bullets(), vec!["one", "two"]);
        assert_eq!(agg.canonical_filename("x"), "2024-07-02_legacy-summary.json");
    }

    #[test]
    fn test_summary_text_falls_back_to_string_content() {
        let rec = record(serde_json::json!({"content": "use tabs"}));
        assert_eq!(rec.summary_text(), "use tabs");
        let rec = record(serde_json::json!({"description": "be concise", "content": "x"}));
        assert_eq!(rec.summary_text(), "be concise");
    }
}
