use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

use crate::dictionary::TermDictionary;
use crate::postings::{Posting, PostingsStore};
use crate::{DocId, Result, SearchyError, SegmentId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocEntry {
    pub doc_id: DocId,
    pub external_id: String,
    /// Indexed term count, used for length normalization.
    pub len: u32,
}

/// Immutable slice of the index: dictionary, postings and document table for a
/// contiguous range of doc ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    id: SegmentId,
    dictionary: TermDictionary,
    postings: PostingsStore,
    /// Sorted by doc id.
    docs: Vec<DocEntry>,
    total_len: u64,
}

impl Segment {
    pub(crate) fn new(id: SegmentId, dictionary: TermDictionary, postings: PostingsStore, docs: Vec<DocEntry>) -> Self {
        let total_len = docs.iter().map(|d| d.len as u64).sum();
        Self { id, dictionary, postings, docs, total_len }
    }

    pub fn id(&self) -> SegmentId { self.id }

    pub fn dictionary(&self) -> &TermDictionary { &self.dictionary }

    pub fn docs(&self) -> &[DocEntry] { &self.docs }

    pub fn doc_count(&self) -> usize { self.docs.len() }

    pub fn total_len(&self) -> u64 { self.total_len }

    pub fn doc_ids(&self) -> impl Iterator<Item = DocId> + '_ { self.docs.iter().map(|d| d.doc_id) }

    /// Half-open range spanning every doc id in the segment.
    pub fn doc_range(&self) -> Option<Range<DocId>> {
        match (self.docs.first(), self.docs.last()) {
            (Some(first), Some(last)) => Some(first.doc_id..last.doc_id + 1),
            _ => None,
        }
    }

    /// Position of `doc_id` in the document table.
    pub fn ordinal(&self, doc_id: DocId) -> Option<usize> {
        self.docs.binary_search_by_key(&doc_id, |d| d.doc_id).ok()
    }

    pub fn doc(&self, doc_id: DocId) -> Option<&DocEntry> { self.ordinal(doc_id).map(|o| &self.docs[o]) }

    pub fn doc_len(&self, doc_id: DocId) -> Option<u32> { self.doc(doc_id).map(|d| d.len) }

    pub fn external_id(&self, doc_id: DocId) -> Option<&str> { self.doc(doc_id).map(|d| d.external_id.as_str()) }

    /// `UnknownTerm` when the term does not occur in this segment.
    pub fn postings(&self, term: &str) -> Result<&[Posting]> {
        let id = self.dictionary.lookup(term).ok_or_else(|| SearchyError::UnknownTerm(term.to_string()))?;
        Ok(self.postings.read_list(id))
    }

    pub fn postings_store(&self) -> &PostingsStore { &self.postings }

    pub fn to_bytes(&self) -> Result<Vec<u8>> { Ok(bincode::serialize(self)?) }

    /// Decode and verify a serialized segment.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let segment: Segment = bincode::deserialize(bytes)?;
        segment.validate()?;
        Ok(segment)
    }

    /// Cross-checks document table, postings order and dictionary statistics.
    pub fn validate(&self) -> Result<()> {
        if self.docs.windows(2).any(|w| w[0].doc_id >= w[1].doc_id) {
            return Err(SearchyError::Consistency(format!("segment {}: document table out of order", self.id)));
        }
        if self.total_len != self.docs.iter().map(|d| d.len as u64).sum::<u64>() {
            return Err(SearchyError::Consistency(format!("segment {}: length total mismatch", self.id)));
        }
        self.postings.validate()?;
        if self.postings.num_terms() > self.dictionary.len() {
            return Err(SearchyError::Consistency(format!("segment {}: postings for unknown terms", self.id)));
        }
        for (id, term, stats) in self.dictionary.iter() {
            let list = self.postings.read_list(id);
            let coll: u64 = list.iter().map(|p| p.freq as u64).sum();
            if list.len() as u32 != stats.doc_freq || coll != stats.coll_freq {
                return Err(SearchyError::Consistency(format!("segment {}: stale statistics for {term:?}", self.id)));
            }
            if let Some(p) = list.iter().find(|p| self.ordinal(p.doc_id).is_none()) {
                return Err(SearchyError::Consistency(format!("segment {}: posting for unknown doc {}", self.id, p.doc_id)));
            }
        }
        Ok(())
    }
}

/// Deletion markers for one segment, indexed by document ordinal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstones {
    deleted: Vec<bool>,
    count: usize,
}

impl Tombstones {
    pub fn new(doc_count: usize) -> Self { Self { deleted: vec![false; doc_count], count: 0 } }

    pub fn is_deleted(&self, ordinal: usize) -> bool { self.deleted.get(ordinal).copied().unwrap_or(false) }

    /// Returns false when the ordinal was already deleted.
    pub fn delete(&mut self, ordinal: usize) -> bool {
        match self.deleted.get_mut(ordinal) {
            Some(slot) if !*slot => {
                *slot = true;
                self.count += 1;
                true
            }
            _ => false,
        }
    }

    pub fn count(&self) -> usize { self.count }

    pub fn len(&self) -> usize { self.deleted.len() }

    pub fn is_empty(&self) -> bool { self.count == 0 }
}

/// A segment paired with the tombstones visible to one snapshot.
#[derive(Debug, Clone)]
pub struct SegmentView {
    segment: Arc<Segment>,
    tombstones: Arc<Tombstones>,
    live_len: u64,
}

impl SegmentView {
    pub fn new(segment: Arc<Segment>, tombstones: Arc<Tombstones>) -> Result<Self> {
        if tombstones.len() != segment.doc_count() {
            return Err(SearchyError::Consistency(format!(
                "segment {}: {} tombstone slots for {} docs", segment.id(), tombstones.len(), segment.doc_count()
            )));
        }
        let live_len = segment
            .docs()
            .iter()
            .enumerate()
            .filter(|(o, _)| !tombstones.is_deleted(*o))
            .map(|(_, d)| d.len as u64)
            .sum();
        Ok(Self { segment, tombstones, live_len })
    }

    pub fn fresh(segment: Segment) -> Self {
        let tombstones = Tombstones::new(segment.doc_count());
        let live_len = segment.total_len();
        Self { segment: Arc::new(segment), tombstones: Arc::new(tombstones), live_len }
    }

    pub fn segment(&self) -> &Arc<Segment> { &self.segment }

    pub fn tombstones(&self) -> &Arc<Tombstones> { &self.tombstones }

    pub fn id(&self) -> SegmentId { self.segment.id() }

    pub fn is_live(&self, doc_id: DocId) -> bool {
        self.segment.ordinal(doc_id).is_some_and(|o| !self.tombstones.is_deleted(o))
    }

    pub fn live_docs(&self) -> impl Iterator<Item = &DocEntry> + '_ {
        self.segment.docs().iter().enumerate().filter(|(o, _)| !self.tombstones.is_deleted(*o)).map(|(_, d)| d)
    }

    pub fn live_count(&self) -> usize { self.segment.doc_count() - self.tombstones.count() }

    pub fn deleted_count(&self) -> usize { self.tombstones.count() }

    pub fn live_len(&self) -> u64 { self.live_len }

    pub fn delete_ratio(&self) -> f64 {
        if self.segment.doc_count() == 0 {
            return 0.0;
        }
        self.tombstones.count() as f64 / self.segment.doc_count() as f64
    }

    /// Copy-on-write delete: the receiver is left untouched.
    pub fn with_deleted(&self, doc_id: DocId) -> Result<SegmentView> {
        let ordinal = self
            .segment
            .ordinal(doc_id)
            .ok_or_else(|| SearchyError::NotFound(format!("doc {doc_id}")))?;
        let mut tombstones = (*self.tombstones).clone();
        if !tombstones.delete(ordinal) {
            return Err(SearchyError::NotFound(format!("doc {doc_id} already deleted")));
        }
        let len = self.segment.docs()[ordinal].len as u64;
        Ok(SegmentView { segment: self.segment.clone(), tombstones: Arc::new(tombstones), live_len: self.live_len - len })
    }
}
