use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::{Duration, Instant};

use super::{QueryNode, MAX_DEPTH};
use crate::manager::SegmentSet;
use crate::postings::Posting;
use crate::scorer::Bm25;
use crate::segment::SegmentView;
use crate::{DocId, Result, SearchyError};

/// Matches sorted by doc id, with accumulated scores.
type Hits = Vec<(DocId, f32)>;

/// How often long postings scans look at the clock.
const CHECK_EVERY: usize = 1024;

/// Caller-supplied time budget for one query.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self { Self { start: Instant::now(), budget } }

    pub fn unbounded() -> Self { Self::new(None) }

    pub fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.start.elapsed() >= budget => Err(SearchyError::Timeout { budget }),
            _ => Ok(()),
        }
    }
}

/// Evaluates query trees against one snapshot.
pub struct Searcher<'a> {
    set: &'a SegmentSet,
    scorer: Bm25,
    deadline: Deadline,
    avgdl: f32,
}

/// Length of `doc_id` if it is live in `view`.
fn live_len(view: &SegmentView, doc_id: DocId) -> Option<u32> {
    let seg = view.segment();
    let ordinal = seg.ordinal(doc_id)?;
    if view.tombstones().is_deleted(ordinal) {
        return None;
    }
    Some(seg.docs()[ordinal].len)
}

impl<'a> Searcher<'a> {
    pub fn new(set: &'a SegmentSet, scorer: Bm25, deadline: Deadline) -> Self {
        Self { set, scorer, deadline, avgdl: set.avgdl() }
    }

    /// Ranked matches: score descending, ties by ascending doc id.
    pub fn search(&self, node: &QueryNode, limit: usize) -> Result<Vec<(DocId, f32)>> {
        self.deadline.check()?;
        let mut hits = self.eval(node, 0)?;
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Unranked match count.
    pub fn count(&self, node: &QueryNode) -> Result<usize> { Ok(self.eval(node, 0)?.len()) }

    fn eval(&self, node: &QueryNode, depth: usize) -> Result<Hits> {
        self.deadline.check()?;
        if depth > MAX_DEPTH {
            return Err(SearchyError::Validation("query nested too deeply".into()));
        }
        let depth = depth + 1;
        match node {
            QueryNode::Empty => Ok(Vec::new()),
            QueryNode::Term(term) => self.term(term),
            QueryNode::Phrase(parts) => self.phrase(parts),
            QueryNode::Or(children) => {
                let mut acc = Vec::new();
                for child in children {
                    acc = union(&acc, &self.eval(child, depth)?);
                }
                Ok(acc)
            }
            QueryNode::And(children) => self.and(children, depth),
            QueryNode::Not(inner) => Ok(difference(&self.universe()?, &self.eval(inner, depth)?)),
        }
    }

    fn and(&self, children: &[QueryNode], depth: usize) -> Result<Hits> {
        let (negative, positive): (Vec<&QueryNode>, Vec<&QueryNode>) =
            children.iter().partition(|c| matches!(c, QueryNode::Not(_)));
        let mut acc = match positive.split_first() {
            None => self.universe()?,
            Some((first, rest)) => {
                let mut acc = self.eval(first, depth)?;
                for child in rest {
                    if acc.is_empty() {
                        break;
                    }
                    acc = intersect(&acc, &self.eval(child, depth)?);
                }
                acc
            }
        };
        for neg in negative {
            if acc.is_empty() {
                break;
            }
            if let QueryNode::Not(inner) = neg {
                acc = difference(&acc, &self.eval(inner, depth)?);
            }
        }
        Ok(acc)
    }

    /// Every live document, unscored.
    fn universe(&self) -> Result<Hits> {
        let mut out = Vec::with_capacity(self.set.live_docs() as usize);
        for view in self.set.views() {
            self.deadline.check()?;
            out.extend(view.live_docs().map(|d| (d.doc_id, 0.0)));
        }
        Ok(out)
    }

    /// Live postings of `term` across the snapshot, as (doc, freq, doc length).
    /// Segments lacking the term contribute nothing.
    fn live_postings(&self, term: &str) -> Result<Vec<(DocId, u32, u32)>> {
        let mut out = Vec::new();
        for view in self.set.views() {
            let list = match view.segment().postings(term) {
                Ok(list) => list,
                Err(SearchyError::UnknownTerm(_)) => continue,
                Err(e) => return Err(e),
            };
            for (i, p) in list.iter().enumerate() {
                if i % CHECK_EVERY == 0 {
                    self.deadline.check()?;
                }
                if let Some(len) = live_len(view, p.doc_id) {
                    out.push((p.doc_id, p.freq, len));
                }
            }
        }
        Ok(out)
    }

    fn term(&self, term: &str) -> Result<Hits> {
        let postings = self.live_postings(term)?;
        let idf = self.scorer.idf(self.set.live_docs(), postings.len() as u64);
        Ok(postings
            .into_iter()
            .map(|(doc, tf, len)| (doc, self.scorer.score(tf, len, self.avgdl, idf)))
            .collect())
    }

    fn phrase(&self, parts: &[(String, u32)]) -> Result<Hits> {
        if parts.is_empty() {
            return Ok(Vec::new());
        }
        let mut idf = 0.0;
        let mut seen: HashSet<&str> = HashSet::new();
        for (term, _) in parts {
            if seen.insert(term.as_str()) {
                let df = self.live_postings(term)?.len() as u64;
                idf += self.scorer.idf(self.set.live_docs(), df);
            }
        }

        let mut out = Vec::new();
        'segments: for view in self.set.views() {
            let mut lists: Vec<(&[Posting], u32)> = Vec::with_capacity(parts.len());
            for (term, offset) in parts {
                match view.segment().postings(term) {
                    Ok(list) => lists.push((list, *offset)),
                    Err(SearchyError::UnknownTerm(_)) => continue 'segments,
                    Err(e) => return Err(e),
                }
            }
            let mut cursors = vec![0usize; lists.len()];
            'docs: for (i, lead) in lists[0].0.iter().enumerate() {
                if i % CHECK_EVERY == 0 {
                    self.deadline.check()?;
                }
                let mut postings: Vec<&Posting> = vec![lead];
                for (k, (list, _)) in lists.iter().enumerate().skip(1) {
                    let c = &mut cursors[k];
                    while *c < list.len() && list[*c].doc_id < lead.doc_id {
                        *c += 1;
                    }
                    match list.get(*c) {
                        Some(p) if p.doc_id == lead.doc_id => postings.push(p),
                        _ => continue 'docs,
                    }
                }
                let Some(len) = live_len(view, lead.doc_id) else { continue };
                let freq = phrase_freq(&postings, &lists);
                if freq > 0 {
                    out.push((lead.doc_id, self.scorer.score(freq, len, self.avgdl, idf)));
                }
            }
        }
        Ok(out)
    }
}

/// Occurrences where every term sits at its offset from the first.
fn phrase_freq(postings: &[&Posting], lists: &[(&[Posting], u32)]) -> u32 {
    let lead_offset = lists[0].1;
    postings[0]
        .positions
        .iter()
        .filter(|&&start| {
            start >= lead_offset
                && postings.iter().zip(lists).skip(1).all(|(p, (_, offset))| {
                    p.positions.binary_search(&(start - lead_offset + offset)).is_ok()
                })
        })
        .count() as u32
}

fn intersect(a: &[(DocId, f32)], b: &[(DocId, f32)]) -> Hits {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                out.push((a[i].0, a[i].1 + b[j].1));
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn union(a: &[(DocId, f32)], b: &[(DocId, f32)]) -> Hits {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            Ordering::Less => { out.push(a[i]); i += 1; }
            Ordering::Greater => { out.push(b[j]); j += 1; }
            Ordering::Equal => {
                out.push((a[i].0, a[i].1 + b[j].1));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn difference(a: &[(DocId, f32)], b: &[(DocId, f32)]) -> Hits {
    let mut out = Vec::with_capacity(a.len());
    let mut j = 0;
    for &(doc, score) in a {
        while j < b.len() && b[j].0 < doc {
            j += 1;
        }
        if j < b.len() && b[j].0 == doc {
            continue;
        }
        out.push((doc, score));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::config::Operator;
    use crate::manager::SegmentManager;
    use crate::query::parse;
    use crate::tokenizer::Analyzer;

    fn manager(batches: &[&[(&str, &str)]]) -> SegmentManager {
        let analyzer = Analyzer::default();
        let mgr = SegmentManager::new(SegmentSet::default(), 0);
        let mut b = IndexBuilder::new(0);
        for docs in batches {
            for (ext, text) in docs.iter() {
                b.add_document(&analyzer, ext, text).unwrap();
            }
            let (seg, _) = b.build_segment(mgr.allocate_id()).unwrap();
            b.reset();
            mgr.publish(SegmentView::fresh(seg)).unwrap();
        }
        mgr
    }

    fn docs(set: &SegmentSet, q: &str) -> Vec<DocId> {
        let node = parse(q, &Analyzer::default(), Operator::Or).unwrap();
        let mut ids: Vec<DocId> = Searcher::new(set, Bm25::default(), Deadline::unbounded())
            .search(&node, 100)
            .unwrap()
            .into_iter()
            .map(|(d, _)| d)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn hand_built_trees_are_depth_checked() {
        let mgr = manager(&[&[("a", "red fox"), ("b", "blue fox")]]);
        let set = mgr.snapshot();
        let searcher = Searcher::new(&set, Bm25::default(), Deadline::unbounded());
        let nest = |n: usize| (0..n).fold(QueryNode::Term("fox".into()), |q, _| QueryNode::Not(Box::new(q)));
        assert_eq!(searcher.count(&nest(MAX_DEPTH)).unwrap(), 2);
        assert!(matches!(searcher.count(&nest(MAX_DEPTH + 1)), Err(SearchyError::Validation(_))));
    }

    #[test]
    fn merge_join_helpers() {
        let a = vec![(1, 1.0), (3, 1.0), (5, 1.0)];
        let b = vec![(3, 2.0), (4, 2.0), (5, 2.0)];
        assert_eq!(intersect(&a, &b), vec![(3, 3.0), (5, 3.0)]);
        assert_eq!(union(&a, &b).iter().map(|h| h.0).collect::<Vec<_>>(), vec![1, 3, 4, 5]);
        assert_eq!(difference(&a, &b), vec![(1, 1.0)]);
    }

    #[test]
    fn boolean_across_segments() {
        let mgr = manager(&[&[("a", "red fox"), ("b", "blue fox")], &[("c", "red panda")]]);
        let set = mgr.snapshot();
        assert_eq!(docs(&set, "red"), vec![0, 2]);
        assert_eq!(docs(&set, "red AND fox"), vec![0]);
        assert_eq!(docs(&set, "red OR blue"), vec![0, 1, 2]);
        assert_eq!(docs(&set, "fox NOT blue"), vec![0]);
        assert_eq!(docs(&set, "NOT fox"), vec![2]);
        assert_eq!(docs(&set, "cat"), Vec::<DocId>::new());
    }

    #[test]
    fn phrase_requires_adjacency() {
        let mgr = manager(&[&[("a", "quick brown fox"), ("b", "brown quick fox"), ("c", "quick fox in den")]]);
        let set = mgr.snapshot();
        assert_eq!(docs(&set, "\"quick brown\""), vec![0]);
        assert_eq!(docs(&set, "\"quick fox\""), vec![1, 2]);
        assert_eq!(docs(&set, "\"brown quick fox\""), vec![1]);
        assert_eq!(docs(&set, "\"fox den\""), Vec::<DocId>::new());
        assert_eq!(docs(&set, "\"fox in den\""), vec![2]);
    }

    #[test]
    fn zero_budget_times_out() {
        let mgr = manager(&[&[("a", "fox")]]);
        let set = mgr.snapshot();
        let s = Searcher::new(&set, Bm25::default(), Deadline::new(Some(Duration::ZERO)));
        assert!(matches!(s.search(&QueryNode::Term("fox".into()), 10), Err(SearchyError::Timeout { .. })));
    }

    #[test]
    fn ties_break_by_doc_id() {
        let mgr = manager(&[&[("a", "fox"), ("b", "fox"), ("c", "fox")]]);
        let set = mgr.snapshot();
        let hits = Searcher::new(&set, Bm25::default(), Deadline::unbounded())
            .search(&QueryNode::Term("fox".into()), 2)
            .unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
    }
}
