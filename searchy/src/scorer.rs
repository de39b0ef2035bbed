use crate::config::Bm25Params;

/// BM25 relevance. Pure arithmetic over collection statistics, so identical
/// inputs always produce identical scores.
#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    params: Bm25Params,
}

impl Bm25 {
    pub fn new(params: Bm25Params) -> Self { Self { params } }

    pub fn params(&self) -> Bm25Params { self.params }

    /// Robertson-Sparck-Jones idf with +1 smoothing; never negative.
    pub fn idf(&self, total_docs: u64, doc_freq: u64) -> f32 {
        let n = total_docs as f32;
        let df = doc_freq as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Weight of a term occurring `tf` times in a document of `doc_len` terms.
    pub fn score(&self, tf: u32, doc_len: u32, avgdl: f32, idf: f32) -> f32 {
        if tf == 0 {
            return 0.0;
        }
        let tf = tf as f32;
        let Bm25Params { k1, b } = self.params;
        let norm = if avgdl > 0.0 { 1.0 - b + b * (doc_len as f32 / avgdl) } else { 1.0 };
        idf * (tf * (k1 + 1.0)) / (tf + k1 * norm)
    }
}

impl Default for Bm25 {
    fn default() -> Self { Self::new(Bm25Params::default()) }
}
