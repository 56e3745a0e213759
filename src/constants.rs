/// Application name, used for the model cache directory and CLI defaults.
pub const APP_NAME: &str = "stylemem";

/// Default model2vec model ID used when none is specified.
pub const DEFAULT_MODEL_ID: &str = "minishlab/potion-base-8M";

/// Subdirectory of the cache dir where downloaded models are kept.
pub const MODELS_SUBDIR: &str = "models";

/// Dimension of the hash-based fallback embedding.
pub const FALLBACK_DIMENSION: usize = 128;

/// Record `type` reserved for aggregate records written by consolidation.
pub const AGGREGATE_TYPE: &str = "mega-summary";

/// Suffix of the aggregate record id: `<YYYY-MM-DD>_legacy-summary`.
pub const AGGREGATE_SUFFIX: &str = "legacy-summary";

/// Date prefix used for records without a `date`.
pub const UNKNOWN_DATE_PREFIX: &str = "unknown";

/// Records at least this many days old are consolidated.
pub const DEFAULT_THRESHOLD_DAYS: i64 = 30;

/// Environment variable naming a local GGUF model for summarization.
pub const LLAMA_MODEL_ENV: &str = "LLAMA_MODEL_PATH";

/// Subdirectory of a base path holding the record files.
pub const MEMORY_SUBDIR: &str = "memory";

/// Subdirectory of a base path holding the index artifacts.
pub const INDICES_SUBDIR: &str = "indices";

pub(crate) const RECORD_EXTENSION: &str = "json";
pub(crate) const DOCS_FILENAME: &str = "docs.json";
pub(crate) const VECTORS_FILENAME: &str = "vectors.bin";
pub(crate) const NATIVE_INDEX_FILENAME: &str = "memory.index";
pub(crate) const MANIFEST_FILENAME: &str = "manifest.json";
