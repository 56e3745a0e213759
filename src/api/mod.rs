use std::collections::HashSet;
use std::path::Path;

use crate::consolidation::{self, Summarizer};
use crate::embeddings::{EmbeddingBackend, EmbeddingProvider};
use crate::search::{FlatL2Index, SearchBackend, VectorMatrix};
use crate::storage::{DirectoryStore, IndexFiles, PersistedIndex, RecordStore};
use crate::types::{Config, ConsolidationReport, IndexStats, Record, SearchResult, StoredRecord};

/// The memory store: record directory, index artifacts and the backends
/// chosen when it was opened.
///
/// Every operation runs to completion on the calling thread. Building the
/// index while another process queries the same directory is unsupported.
pub struct StyleMemory {
    config: Config,
    store: Box<dyn RecordStore>,
    embeddings: EmbeddingBackend,
    backend: SearchBackend,
    files: IndexFiles,
    index: PersistedIndex,
}

impl StyleMemory {
    /// Open the store described by `config`, selecting the embedding and
    /// search backends and loading whatever index is on disk.
    pub fn open(config: Config) -> Result<Self, crate::Error> {
        let embeddings = EmbeddingBackend::new(config.model_id.as_deref());
        let backend = SearchBackend::detect(config.accelerated_search);
        let store = Box::new(DirectoryStore::new(&config.memory_dir));
        Self::with_parts(config, store, embeddings, backend)
    }

    pub fn open_at(base: &Path) -> Result<Self, crate::Error> {
        Self::open(Config::new(base))
    }

    /// Assemble a store from explicit parts.
    pub fn with_parts(
        config: Config,
        store: Box<dyn RecordStore>,
        embeddings: EmbeddingBackend,
        backend: SearchBackend,
    ) -> Result<Self, crate::Error> {
        let files = IndexFiles::new(&config.indices_dir);
        let mut memory = Self {
            config,
            store,
            embeddings,
            backend,
            files,
            index: PersistedIndex::empty(),
        };
        memory.reload_index()?;
        Ok(memory)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embeddings(&self) -> &EmbeddingBackend {
        &self.embeddings
    }

    pub fn search_backend(&self) -> SearchBackend {
        self.backend
    }

    /// Records currently loaded in the index, in index order.
    pub fn records(&self) -> &[Record] {
        &self.index.records
    }

    /// Re-read the index artifacts from disk.
    pub fn reload_index(&mut self) -> Result<(), crate::Error> {
        let index = self.files.load()?;

        let dimension = self.embeddings.dimension();
        if !index.is_empty() && index.vectors.dimension() != dimension {
            tracing::warn!(
                "Index vectors have dimension {} but '{}' produces {}; rebuild the index",
                index.vectors.dimension(),
                self.embeddings.name(),
                dimension
            );
            self.index = PersistedIndex::empty();
            return Ok(());
        }

        if let Some(ref manifest) = index.manifest
            && !index.is_empty()
            && manifest.embedder != self.embeddings.name()
        {
            tracing::warn!(
                "Index was built with '{}' but queries use '{}'",
                manifest.embedder,
                self.embeddings.name()
            );
        }

        self.index = index;
        Ok(())
    }

    /// Rebuild the index from scratch: scan the record directory, give each
    /// ordinary record its canonical file name, embed it and persist the
    /// records together with their vectors.
    pub fn build_index(&mut self) -> Result<IndexStats, crate::Error> {
        let entries: Vec<StoredRecord> = self
            .store
            .entries()?
            .into_iter()
            .filter(|entry| !entry.record.is_aggregate())
            .collect();

        let dimension = self.embeddings.dimension();
        let mut stats = IndexStats {
            dimension,
            embedder: self.embeddings.name().to_string(),
            ..IndexStats::default()
        };

        let mut records = Vec::with_capacity(entries.len());
        let mut vectors = VectorMatrix::with_capacity(dimension, entries.len());

        for entry in entries {
            let file_name = self.store.normalize(&entry.record, &entry.file_name)?;
            if file_name != entry.file_name {
                stats.renamed += 1;
            }

            let embedding = match self.embeddings.embed(&entry.record.embedding_text()) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!("Not indexing {}: {}", file_name, e);
                    stats.skipped += 1;
                    continue;
                }
            };
            if let Err(e) = vectors.push(&embedding) {
                tracing::warn!("Not indexing {}: {}", file_name, e);
                stats.skipped += 1;
                continue;
            }
            records.push(entry.record);
        }

        let native = (self.backend.is_accelerated() && !vectors.is_empty())
            .then(|| FlatL2Index::build(vectors.clone()));

        let manifest = self
            .files
            .save(&records, &vectors, native.as_ref(), self.embeddings.name())?;
        stats.indexed = records.len();
        stats.native_index = manifest.native_index;

        tracing::info!(
            "Indexed {} records ({} renamed, {} skipped) with '{}'",
            stats.indexed,
            stats.renamed,
            stats.skipped,
            stats.embedder
        );

        self.index = PersistedIndex {
            records,
            vectors,
            native,
            manifest: Some(manifest),
        };
        Ok(stats)
    }

    /// Positions of the records eligible for a query. `None` when a non-empty
    /// tag filter matches nothing.
    fn candidates(&self, filter_tags: Option<&[String]>) -> Option<Vec<usize>> {
        let all = || (0..self.index.records.len()).collect::<Vec<_>>();

        let Some(tags) = filter_tags.filter(|tags| !tags.is_empty()) else {
            return Some(all());
        };

        let filter: HashSet<&str> = tags.iter().map(String::as_str).collect();
        let matching: Vec<usize> = self
            .index
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| !record.is_aggregate() && record.shares_tag_with(&filter))
            .map(|(position, _)| position)
            .collect();

        (!matching.is_empty()).then_some(matching)
    }

    /// The `k` indexed records nearest to `query`, nearest first, with their
    /// distances. A non-empty `filter_tags` restricts the search to records
    /// sharing at least one tag with it.
    pub fn search(&self, query: &str, k: usize, filter_tags: Option<&[String]>) -> Vec<SearchResult> {
        if self.index.is_empty() || k == 0 {
            return Vec::new();
        }

        let Some(candidates) = self.candidates(filter_tags) else {
            return Vec::new();
        };

        let query_embedding = match self.embeddings.embed(query) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!("Failed to embed query: {}", e);
                return Vec::new();
            }
        };

        self.backend
            .search(
                &self.index.vectors,
                &candidates,
                &query_embedding,
                k,
                self.index.native.as_ref(),
            )
            .into_iter()
            .filter_map(|neighbor| {
                self.index
                    .records
                    .get(neighbor.position)
                    .map(|record| SearchResult {
                        position: neighbor.position,
                        distance: neighbor.distance,
                        record: record.clone(),
                    })
            })
            .collect()
    }

    /// The `k` indexed records most relevant to `query`, nearest first.
    pub fn get_relevant(&self, query: &str, k: usize, filter_tags: Option<&[String]>) -> Vec<Record> {
        self.search(query, k, filter_tags)
            .into_iter()
            .map(|result| result.record)
            .collect()
    }

    /// The `limit` indexed records with the latest `date`, newest first.
    pub fn recent(&self, limit: usize) -> Vec<Record> {
        let mut records = self.index.records.clone();
        // Stable: records with equal dates keep index order.
        records.sort_by(|a, b| {
            let a = a.date.as_deref().unwrap_or_default();
            let b = b.date.as_deref().unwrap_or_default();
            b.cmp(a)
        });
        records.truncate(limit);
        records
    }

    /// Aggregate records in the record directory, newest file first.
    pub fn aggregates(&self) -> Result<Vec<Record>, crate::Error> {
        let mut aggregates = self.store.load_aggregates()?;
        aggregates.sort_by(|a, b| b.file_name.cmp(&a.file_name));
        Ok(aggregates.into_iter().map(|entry| entry.record).collect())
    }

    /// The newest aggregate whose file name ends with `<suffix>.json`.
    pub fn latest_aggregate(&self, suffix: &str) -> Result<Option<Record>, crate::Error> {
        let file_suffix = format!("{suffix}.json");
        Ok(self
            .store
            .load_aggregates()?
            .into_iter()
            .filter(|entry| entry.file_name.ends_with(&file_suffix))
            .max_by(|a, b| a.file_name.cmp(&b.file_name))
            .map(|entry| entry.record))
    }

    /// Consolidate records older than the configured threshold into one
    /// aggregate record, summarizing with the configured local model when
    /// it loads.
    pub fn consolidate(&self) -> Result<ConsolidationReport, crate::Error> {
        let summarizer = consolidation::load_model_summarizer(&self.config.consolidation);
        self.consolidate_with(summarizer.as_deref(), chrono::Utc::now())
    }

    /// Consolidate as of `now`, with an explicit model summarizer.
    pub fn consolidate_with(
        &self,
        summarizer: Option<&dyn Summarizer>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<ConsolidationReport, crate::Error> {
        consolidation::consolidate(
            self.store.as_ref(),
            self.config.consolidation.threshold_days,
            summarizer,
            now,
        )
    }
}
