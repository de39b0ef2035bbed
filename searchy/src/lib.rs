//! Embeddable full-text search: analyzed inverted index in immutable segments,
//! BM25 ranking, boolean and phrase queries, and an approximate
//! nearest-neighbour index for dense vectors.

pub mod ann;
pub mod builder;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod index;
pub mod manager;
pub mod persist;
pub mod postings;
pub mod query;
pub mod scorer;
pub mod segment;
pub mod tokenizer;

pub type TermId = u32;
pub type DocId = u32;
pub type SegmentId = u64;

pub use config::{AnalyzerConfig, Bm25Params, IndexConfig, Language, MergePolicy, Operator, QueryConfig, StopWords};
pub use error::{Result, SearchyError};
pub use index::{Index, IndexStats, SearchHit};
pub use query::QueryNode;
pub use tokenizer::{Analyzer, Token};
