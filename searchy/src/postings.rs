use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::{DocId, Result, SearchyError, TermId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    /// Always >= 1 and equal to `positions.len()`.
    pub freq: u32,
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn new(doc_id: DocId, positions: Vec<u32>) -> Self {
        Self { doc_id, freq: positions.len() as u32, positions }
    }
}

/// Postings lists indexed directly by term id, each sorted by doc id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingsStore {
    lists: Vec<Vec<Posting>>,
}

impl PostingsStore {
    pub fn new() -> Self { Self::default() }

    /// Append to the tail of `term`'s list. Doc ids must strictly increase per term.
    pub fn append_posting(&mut self, term: TermId, doc_id: DocId, positions: Vec<u32>) -> Result<()> {
        if positions.is_empty() {
            return Err(SearchyError::Validation(format!("empty posting for term {term} in doc {doc_id}")));
        }
        let idx = term as usize;
        if self.lists.len() <= idx {
            self.lists.resize_with(idx + 1, Vec::new);
        }
        let list = &mut self.lists[idx];
        if let Some(last) = list.last() {
            if doc_id <= last.doc_id {
                return Err(SearchyError::OutOfOrderAppend { term, last: last.doc_id, doc: doc_id });
            }
        }
        list.push(Posting::new(doc_id, positions));
        Ok(())
    }

    /// Install a complete, already-ordered list.
    pub(crate) fn set_list(&mut self, term: TermId, list: Vec<Posting>) {
        let idx = term as usize;
        if self.lists.len() <= idx {
            self.lists.resize_with(idx + 1, Vec::new);
        }
        self.lists[idx] = list;
    }

    /// Empty slice for terms that never received a posting.
    pub fn read_list(&self, term: TermId) -> &[Posting] {
        self.lists.get(term as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_terms(&self) -> usize { self.lists.len() }

    pub fn num_postings(&self) -> usize { self.lists.iter().map(Vec::len).sum() }

    /// Checks ordering and frequency invariants of every list.
    pub fn validate(&self) -> Result<()> {
        for (term, list) in self.lists.iter().enumerate() {
            for pair in list.windows(2) {
                if pair[0].doc_id >= pair[1].doc_id {
                    return Err(SearchyError::Consistency(format!(
                        "term {term}: doc {} not after {}", pair[1].doc_id, pair[0].doc_id
                    )));
                }
            }
            if let Some(p) = list.iter().find(|p| p.freq == 0 || p.freq as usize != p.positions.len()) {
                return Err(SearchyError::Consistency(format!("term {term}: bad frequency for doc {}", p.doc_id)));
            }
        }
        Ok(())
    }
}

/// Sorted merge of two postings lists by doc id. Inputs come from segments
/// with disjoint doc ranges, so a shared doc id is an invariant violation.
pub fn merge_lists(a: &[Posting], b: &[Posting]) -> Result<Vec<Posting>> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].doc_id.cmp(&b[j].doc_id) {
            Ordering::Less => { out.push(a[i].clone()); i += 1; }
            Ordering::Greater => { out.push(b[j].clone()); j += 1; }
            Ordering::Equal => {
                return Err(SearchyError::Consistency(format!("doc {} present in both merge inputs", a[i].doc_id)));
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(list: &[Posting]) -> Vec<DocId> { list.iter().map(|p| p.doc_id).collect() }

    #[test]
    fn append_in_order() {
        let mut s = PostingsStore::new();
        s.append_posting(2, 1, vec![0, 4]).unwrap();
        s.append_posting(2, 5, vec![1]).unwrap();
        assert_eq!(ids(s.read_list(2)), vec![1, 5]);
        assert_eq!(s.read_list(2)[0].freq, 2);
        assert!(s.read_list(0).is_empty());
        assert!(s.read_list(99).is_empty());
        s.validate().unwrap();
    }

    #[test]
    fn append_out_of_order_fails() {
        let mut s = PostingsStore::new();
        s.append_posting(0, 7, vec![0]).unwrap();
        let err = s.append_posting(0, 3, vec![0]).unwrap_err();
        assert!(matches!(err, SearchyError::OutOfOrderAppend { term: 0, last: 7, doc: 3 }));
        assert!(s.append_posting(0, 7, vec![1]).is_err());
        assert_eq!(s.read_list(0).len(), 1);
    }

    #[test]
    fn zero_frequency_rejected() {
        let mut s = PostingsStore::new();
        assert!(matches!(s.append_posting(0, 1, vec![]), Err(SearchyError::Validation(_))));
    }

    #[test]
    fn merge_interleaved() {
        let a = vec![Posting::new(1, vec![0]), Posting::new(4, vec![2])];
        let b = vec![Posting::new(2, vec![0]), Posting::new(9, vec![3])];
        assert_eq!(ids(&merge_lists(&a, &b).unwrap()), vec![1, 2, 4, 9]);
        assert!(merge_lists(&a, &a).is_err());
    }

    proptest! {
        #[test]
        fn merge_is_sorted_union(mut docs in proptest::collection::btree_set(0u32..500, 0..60), split in 0usize..60) {
            let all: Vec<DocId> = std::mem::take(&mut docs).into_iter().collect();
            let (mut a, mut b) = (Vec::new(), Vec::new());
            for (n, d) in all.iter().enumerate() {
                if (n + split) % 3 == 0 { a.push(Posting::new(*d, vec![0])) } else { b.push(Posting::new(*d, vec![0])) }
            }
            let merged = merge_lists(&a, &b).unwrap();
            prop_assert_eq!(ids(&merged), all);
        }
    }
}
