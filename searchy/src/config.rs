use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::Result;

/// Settings for one index instance. Every field has a default so partial JSON files load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub analyzer: AnalyzerConfig,
    pub bm25: Bm25Params,
    pub merge: MergePolicy,
    pub query: QueryConfig,
    /// Buffered documents that trigger an automatic flush; 0 disables it.
    pub flush_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            bm25: Bm25Params::default(),
            merge: MergePolicy::default(),
            query: QueryConfig::default(),
            flush_threshold: 10_000,
        }
    }
}

impl IndexConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        let config = serde_json::from_reader(BufReader::new(f))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    French,
    German,
    Italian,
    Portuguese,
    Spanish,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopWords {
    /// Built-in English list.
    Default,
    None,
    Custom(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub lowercase: bool,
    pub stemming: Option<Language>,
    pub stop_words: StopWords,
    /// Tokens longer than this many bytes are dropped.
    pub max_token_len: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self { lowercase: true, stemming: Some(Language::English), stop_words: StopWords::Default, max_token_len: 64 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term frequency saturation
    pub k1: f32,
    /// Length normalization
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

/// When to compact segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    /// Upper bound on live segments a query has to fan out over.
    pub max_segments: usize,
    /// Fraction of tombstoned documents in a run of segments that forces a merge.
    pub tombstone_ratio: f64,
    /// Fewest segments merged at once (a single segment is rewritten only to drop tombstones).
    pub min_merge: usize,
}

impl Default for MergePolicy {
    fn default() -> Self { Self { max_segments: 8, tombstone_ratio: 0.25, min_merge: 2 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Operator joining adjacent clauses with no explicit AND/OR.
    pub default_operator: Operator,
    pub max_results: usize,
}

impl Default for QueryConfig {
    fn default() -> Self { Self { default_operator: Operator::Or, max_results: 10 } }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: IndexConfig = serde_json::from_str(r#"{"bm25": {"k1": 2.0}, "query": {"default_operator": "AND"}}"#).unwrap();
        assert_eq!(cfg.bm25.k1, 2.0);
        assert_eq!(cfg.bm25.b, 0.75);
        assert_eq!(cfg.query.default_operator, Operator::And);
        assert_eq!(cfg.analyzer, AnalyzerConfig::default());
        assert_eq!(cfg.flush_threshold, 10_000);
    }

    #[test]
    fn custom_stop_words_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"analyzer": {{"stemming": null, "stop_words": {{"custom": ["foo"]}}}}}}"#).unwrap();
        let cfg = IndexConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.analyzer.stemming, None);
        assert_eq!(cfg.analyzer.stop_words, StopWords::Custom(vec!["foo".into()]));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = IndexConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, crate::SearchyError::Io(_)));
    }
}
