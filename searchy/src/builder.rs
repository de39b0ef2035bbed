use std::collections::HashMap;

use crate::dictionary::TermDictionary;
use crate::postings::PostingsStore;
use crate::segment::{DocEntry, Segment, Tombstones};
use crate::tokenizer::Analyzer;
use crate::{DocId, Result, SearchyError, SegmentId, TermId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Nothing ingested since creation.
    Open,
    Ingesting,
    /// The last batch became a segment; ready for the next one.
    Flushed,
}

struct PendingDoc {
    entry: DocEntry,
    terms: Vec<(TermId, Vec<u32>)>,
    deleted: bool,
}

/// Accumulates one batch of documents. Postings are sorted once when the
/// batch is turned into a segment.
pub struct IndexBuilder {
    state: BuilderState,
    next_doc_id: DocId,
    dictionary: TermDictionary,
    pending: Vec<PendingDoc>,
}

impl IndexBuilder {
    /// Doc ids are handed out from `next_doc_id` upward and never reused.
    pub fn new(next_doc_id: DocId) -> Self {
        Self { state: BuilderState::Open, next_doc_id, dictionary: TermDictionary::new(), pending: Vec::new() }
    }

    pub fn state(&self) -> BuilderState { self.state }

    pub fn next_doc_id(&self) -> DocId { self.next_doc_id }

    /// Buffered documents, deleted ones included.
    pub fn len(&self) -> usize { self.pending.len() }

    pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    pub fn add_document(&mut self, analyzer: &Analyzer, external_id: &str, text: &str) -> Result<DocId> {
        if external_id.trim().is_empty() {
            return Err(SearchyError::Validation("document id must not be empty".into()));
        }
        let doc_id = self.next_doc_id;
        let next = doc_id
            .checked_add(1)
            .ok_or_else(|| SearchyError::Consistency("document id space exhausted".into()))?;

        let mut by_term: HashMap<TermId, Vec<u32>> = HashMap::new();
        let mut len = 0u32;
        for token in analyzer.analyze(text) {
            let tid = self.dictionary.intern(&token.term);
            by_term.entry(tid).or_default().push(token.position);
            len += 1;
        }
        let mut terms: Vec<(TermId, Vec<u32>)> = by_term.into_iter().collect();
        terms.sort_unstable_by_key(|(tid, _)| *tid);

        self.pending.push(PendingDoc {
            entry: DocEntry { doc_id, external_id: external_id.to_string(), len },
            terms,
            deleted: false,
        });
        self.next_doc_id = next;
        self.state = BuilderState::Ingesting;
        Ok(doc_id)
    }

    fn find(&self, doc_id: DocId) -> Option<usize> {
        self.pending.binary_search_by_key(&doc_id, |d| d.entry.doc_id).ok()
    }

    /// External id of a buffered, not yet deleted document.
    pub fn external_id(&self, doc_id: DocId) -> Option<&str> {
        self.find(doc_id)
            .map(|i| &self.pending[i])
            .filter(|d| !d.deleted)
            .map(|d| d.entry.external_id.as_str())
    }

    pub fn contains(&self, doc_id: DocId) -> bool { self.external_id(doc_id).is_some() }

    /// Tombstone a buffered document.
    pub fn delete(&mut self, doc_id: DocId) -> Result<()> {
        match self.find(doc_id) {
            Some(i) if !self.pending[i].deleted => {
                self.pending[i].deleted = true;
                Ok(())
            }
            Some(_) => Err(SearchyError::NotFound(format!("doc {doc_id} already deleted"))),
            None => Err(SearchyError::NotFound(format!("doc {doc_id}"))),
        }
    }

    /// Take back the most recent `add_document`, as if it never happened.
    /// Only the last buffered document can be retracted.
    pub fn retract(&mut self, doc_id: DocId) -> bool {
        if self.pending.last().map(|d| d.entry.doc_id) != Some(doc_id) {
            return false;
        }
        self.pending.pop();
        self.next_doc_id = doc_id;
        if self.pending.is_empty() {
            self.dictionary = TermDictionary::new();
        }
        true
    }

    /// Freeze the batch into a segment plus its tombstones. The batch itself is
    /// left intact so a failed publish can be retried; call `reset` after.
    pub fn build_segment(&self, id: SegmentId) -> Result<(Segment, Tombstones)> {
        let mut entries: Vec<(TermId, DocId, &[u32])> = Vec::new();
        for doc in &self.pending {
            for (tid, positions) in &doc.terms {
                entries.push((*tid, doc.entry.doc_id, positions.as_slice()));
            }
        }
        entries.sort_unstable_by_key(|(tid, doc, _)| (*tid, *doc));

        let mut dictionary = self.dictionary.clone();
        let mut postings = PostingsStore::new();
        for (tid, doc, positions) in entries {
            postings.append_posting(tid, doc, positions.to_vec())?;
            dictionary.record(tid, positions.len() as u32)?;
        }

        let docs: Vec<DocEntry> = self.pending.iter().map(|d| d.entry.clone()).collect();
        let mut tombstones = Tombstones::new(docs.len());
        for (ordinal, doc) in self.pending.iter().enumerate() {
            if doc.deleted {
                tombstones.delete(ordinal);
            }
        }
        Ok((Segment::new(id, dictionary, postings, docs), tombstones))
    }

    /// Drop the batch after its segment was published. Doc ids keep counting.
    pub fn reset(&mut self) {
        self.dictionary = TermDictionary::new();
        self.pending.clear();
        self.state = BuilderState::Flushed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        assert_eq!(b.state(), BuilderState::Open);
        assert_eq!(b.add_document(&analyzer, "a", "the quick fox").unwrap(), 0);
        assert_eq!(b.state(), BuilderState::Ingesting);
        b.build_segment(1).unwrap();
        b.reset();
        assert_eq!(b.state(), BuilderState::Flushed);
        assert_eq!(b.add_document(&analyzer, "b", "slow fox").unwrap(), 1);
    }

    #[test]
    fn segment_contents() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(10);
        b.add_document(&analyzer, "a", "fox fox dog").unwrap();
        b.add_document(&analyzer, "b", "the fox").unwrap();
        let (seg, tomb) = b.build_segment(3).unwrap();
        seg.validate().unwrap();
        assert_eq!(seg.doc_range(), Some(10..12));
        let fox = seg.postings("fox").unwrap();
        assert_eq!(fox.iter().map(|p| (p.doc_id, p.freq)).collect::<Vec<_>>(), vec![(10, 2), (11, 1)]);
        assert_eq!(fox[1].positions, vec![1]);
        assert_eq!(seg.dictionary().term_stats("fox").unwrap().coll_freq, 3);
        assert_eq!(seg.doc_len(11), Some(1));
        assert!(tomb.is_empty());
    }

    #[test]
    fn delete_buffered() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        let id = b.add_document(&analyzer, "a", "fox").unwrap();
        b.delete(id).unwrap();
        assert!(!b.contains(id));
        assert!(matches!(b.delete(id), Err(SearchyError::NotFound(_))));
        assert!(matches!(b.delete(99), Err(SearchyError::NotFound(_))));
        let (_, tomb) = b.build_segment(0).unwrap();
        assert_eq!(tomb.count(), 1);
    }

    #[test]
    fn retract_last_only() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(5);
        let first = b.add_document(&analyzer, "a", "red fox").unwrap();
        let second = b.add_document(&analyzer, "b", "blue whale").unwrap();
        assert!(!b.retract(first));
        assert!(b.retract(second));
        assert_eq!(b.len(), 1);
        assert_eq!(b.next_doc_id(), second);
        assert_eq!(b.add_document(&analyzer, "b", "grey whale").unwrap(), second);

        let (seg, _) = b.build_segment(0).unwrap();
        seg.validate().unwrap();
        assert!(seg.postings("blue").unwrap_or_default().is_empty());
        assert_eq!(seg.postings("whale").unwrap().len(), 1);

        assert!(b.retract(second));
        assert!(b.retract(first));
        assert!(b.is_empty());
        assert_eq!(b.next_doc_id(), 5);
    }

    #[test]
    fn empty_external_id_rejected() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        assert!(matches!(b.add_document(&analyzer, " ", "fox"), Err(SearchyError::Validation(_))));
        assert_eq!(b.next_doc_id(), 0);
        assert!(b.is_empty());
    }
}
