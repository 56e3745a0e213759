//! # stylemem
//!
//! A personal style memory: a directory of small JSON records (coding
//! preferences, writing rules, habits) that can be searched by meaning and
//! periodically folded into summary records.
//!
//! Records are embedded with a [model2vec] model when one is available and a
//! deterministic 128-dimensional hash embedding otherwise. Queries run
//! against a flat L2 index, SIMD-accelerated through [simsimd] when compiled
//! in, with a brute-force path that returns the same neighbours.
//!
//! [model2vec]: https://docs.rs/model2vec
//! [simsimd]: https://docs.rs/simsimd
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use stylemem::StyleMemory;
//! use std::path::Path;
//!
//! # fn example() -> Result<(), stylemem::Error> {
//! let mut memory = StyleMemory::open_at(Path::new("."))?;
//! memory.build_index()?;
//!
//! let tags = vec!["rust".to_string()];
//! for record in memory.get_relevant("how do I indent code", 3, Some(tags.as_slice())) {
//!     println!("{}", record.name.as_deref().unwrap_or_default());
//! }
//!
//! let report = memory.consolidate()?;
//! println!("consolidated {} records", report.old);
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage layout
//!
//! | Path                    | Purpose                                    |
//! |-------------------------|--------------------------------------------|
//! | `memory/*.json`         | One record per file, `<date>_<id>.json`    |
//! | `indices/docs.json`     | Indexed records, in index order            |
//! | `indices/vectors.bin`   | Embedding matrix (rkyv)                    |
//! | `indices/memory.index`  | Prebuilt flat L2 index (rkyv, optional)    |
//! | `indices/manifest.json` | Counts, dimension, embedder and checksums  |
//!
//! The index is rebuilt from scratch by [`StyleMemory::build_index`]. An
//! index whose artifacts disagree with each other loads as empty.
//!
//! ## Feature flags
//!
//! | Flag        | Default | Description                                        |
//! |-------------|---------|----------------------------------------------------|
//! | `model2vec` | **yes** | Semantic embeddings via model2vec.                 |
//! | `simd`      | **yes** | SIMD distance kernels via simsimd.                 |
//! | `llama`     | no      | Model-written consolidation summaries (llama.cpp). |

pub mod api;
pub mod constants;
pub mod consolidation;
pub mod embeddings;
pub mod error;
pub mod search;
pub mod storage;
pub mod types;

pub use api::StyleMemory;
pub use constants::{APP_NAME, DEFAULT_MODEL_ID};
pub use error::{Error, Result};
pub use types::{
    Config, ConsolidationConfig, ConsolidationReport, IndexStats, Record, SearchResult,
};
