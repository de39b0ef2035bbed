//! Live segment set and compaction.
//!
//! Readers take an `Arc<SegmentSet>` snapshot and never block. Every mutation
//! builds a complete new set and swaps it in atomically, so a query holding an
//! older snapshot keeps its segments alive until it finishes.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::MergePolicy;
use crate::dictionary::TermDictionary;
use crate::postings::{merge_lists, Posting, PostingsStore};
use crate::segment::{DocEntry, Segment, SegmentView};
use crate::{DocId, Result, SearchyError, SegmentId};

/// Immutable snapshot of the live segments, ordered by doc range.
#[derive(Debug, Clone, Default)]
pub struct SegmentSet {
    generation: u64,
    views: Vec<SegmentView>,
    live_docs: u64,
    live_len: u64,
}

impl SegmentSet {
    pub fn new(generation: u64, mut views: Vec<SegmentView>) -> Result<Self> {
        views.sort_by_key(|v| v.segment().doc_range().map(|r| r.start).unwrap_or(DocId::MAX));
        for pair in views.windows(2) {
            if let (Some(a), Some(b)) = (pair[0].segment().doc_range(), pair[1].segment().doc_range()) {
                if a.end > b.start {
                    return Err(SearchyError::Consistency(format!(
                        "segments {} and {} overlap", pair[0].id(), pair[1].id()
                    )));
                }
            }
        }
        let live_docs = views.iter().map(|v| v.live_count() as u64).sum();
        let live_len = views.iter().map(|v| v.live_len()).sum();
        Ok(Self { generation, views, live_docs, live_len })
    }

    pub fn generation(&self) -> u64 { self.generation }

    pub fn views(&self) -> &[SegmentView] { &self.views }

    pub fn ids(&self) -> Vec<SegmentId> { self.views.iter().map(|v| v.id()).collect() }

    pub fn len(&self) -> usize { self.views.len() }

    pub fn is_empty(&self) -> bool { self.views.is_empty() }

    pub fn live_docs(&self) -> u64 { self.live_docs }

    pub fn deleted_docs(&self) -> u64 { self.views.iter().map(|v| v.deleted_count() as u64).sum() }

    /// Average indexed length over live documents.
    pub fn avgdl(&self) -> f32 {
        if self.live_docs == 0 {
            return 0.0;
        }
        (self.live_len as f64 / self.live_docs as f64) as f32
    }

    pub fn get(&self, id: SegmentId) -> Option<&SegmentView> { self.views.iter().find(|v| v.id() == id) }

    /// Segment whose doc range covers `doc_id`.
    pub fn find(&self, doc_id: DocId) -> Option<&SegmentView> {
        let idx = self
            .views
            .partition_point(|v| v.segment().doc_range().is_some_and(|r| r.end <= doc_id));
        self.views.get(idx).filter(|v| v.segment().doc_range().is_some_and(|r| r.contains(&doc_id)))
    }

    pub fn is_live(&self, doc_id: DocId) -> bool { self.find(doc_id).is_some_and(|v| v.is_live(doc_id)) }

    pub fn external_id(&self, doc_id: DocId) -> Option<&str> {
        self.find(doc_id).filter(|v| v.is_live(doc_id)).and_then(|v| v.segment().external_id(doc_id))
    }

    pub fn with_segment(&self, view: SegmentView) -> Result<SegmentSet> {
        let mut views = self.views.clone();
        views.push(view);
        SegmentSet::new(self.generation + 1, views)
    }

    /// New set with `doc_id` tombstoned, plus the rewritten view.
    pub fn with_tombstone(&self, doc_id: DocId) -> Result<(SegmentSet, SegmentView)> {
        let idx = self
            .find(doc_id)
            .map(|v| v.id())
            .and_then(|id| self.views.iter().position(|v| v.id() == id))
            .ok_or_else(|| SearchyError::NotFound(format!("doc {doc_id}")))?;
        let view = self.views[idx].with_deleted(doc_id)?;
        let mut views = self.views.clone();
        views[idx] = view.clone();
        Ok((SegmentSet::new(self.generation + 1, views)?, view))
    }

    /// New set where the adjacent run `ids` is replaced by `merged`.
    pub fn with_merged(&self, ids: &[SegmentId], merged: SegmentView) -> Result<SegmentSet> {
        let mut views: Vec<SegmentView> = self.views.iter().filter(|v| !ids.contains(&v.id())).cloned().collect();
        if views.len() + ids.len() != self.views.len() {
            return Err(SearchyError::NotFound(format!("segments {ids:?} are not all live")));
        }
        if merged.segment().doc_count() > 0 {
            views.push(merged);
        }
        SegmentSet::new(self.generation + 1, views)
    }

    /// Positions of `ids` in the set; they must form one adjacent run.
    fn run(&self, ids: &[SegmentId]) -> Result<Vec<usize>> {
        if ids.is_empty() {
            return Err(SearchyError::Validation("nothing to merge".into()));
        }
        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let pos = self
                .views
                .iter()
                .position(|v| v.id() == *id)
                .ok_or_else(|| SearchyError::NotFound(format!("segment {id}")))?;
            positions.push(pos);
        }
        positions.sort_unstable();
        positions.dedup();
        if positions.len() != ids.len() || positions.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(SearchyError::Validation(format!("segments {ids:?} are not one adjacent run")));
        }
        Ok(positions)
    }

    /// Pick segments worth merging under `policy`, if any.
    pub fn plan(&self, policy: &MergePolicy) -> Option<Vec<SegmentId>> {
        let n = self.views.len();
        if policy.max_segments > 0 && n > policy.max_segments {
            // cheapest adjacent run that brings the count back under the limit
            let width = (n - policy.max_segments + 1).max(policy.min_merge.max(2)).min(n);
            let start = (0..=n - width)
                .min_by_key(|&s| self.views[s..s + width].iter().map(|v| v.segment().doc_count()).sum::<usize>())?;
            return Some(self.views[start..start + width].iter().map(|v| v.id()).collect());
        }
        self.views
            .iter()
            .filter(|v| v.deleted_count() > 0 && v.delete_ratio() > policy.tombstone_ratio)
            .max_by(|a, b| a.delete_ratio().total_cmp(&b.delete_ratio()))
            .map(|v| vec![v.id()])
    }
}

/// k-way merge of the run `ids` into one segment. Tombstoned documents are
/// dropped, terms left without live postings disappear, and statistics are
/// recomputed from the surviving postings.
pub fn merge_segments(set: &SegmentSet, ids: &[SegmentId], new_id: SegmentId) -> Result<Segment> {
    let positions = set.run(ids)?;
    let inputs: Vec<&SegmentView> = positions.iter().map(|&p| &set.views[p]).collect();

    let mut docs: Vec<DocEntry> = Vec::new();
    for view in &inputs {
        docs.extend(view.live_docs().cloned());
    }

    // term -> one live list per input; BTreeMap keeps the new term ids deterministic
    let mut lists: BTreeMap<&str, Vec<Vec<Posting>>> = BTreeMap::new();
    for view in &inputs {
        for (tid, term, _) in view.segment().dictionary().iter() {
            let live: Vec<Posting> = view
                .segment()
                .postings_store()
                .read_list(tid)
                .iter()
                .filter(|p| view.is_live(p.doc_id))
                .cloned()
                .collect();
            if !live.is_empty() {
                lists.entry(term).or_default().push(live);
            }
        }
    }

    let mut dictionary = TermDictionary::new();
    let mut postings = PostingsStore::new();
    for (term, parts) in lists {
        let mut merged: Vec<Posting> = Vec::new();
        for part in parts {
            merged = merge_lists(&merged, &part)?;
        }
        let tid = dictionary.intern(term);
        for p in &merged {
            dictionary.record(tid, p.freq)?;
        }
        postings.set_list(tid, merged);
    }

    let segment = Segment::new(new_id, dictionary, postings, docs);
    segment.validate()?;
    Ok(segment)
}

/// Owner of the current `SegmentSet`. Mutations are serialized by an internal
/// lock; reads are a single atomic load.
pub struct SegmentManager {
    current: ArcSwap<SegmentSet>,
    lock: Mutex<()>,
    next_segment_id: AtomicU64,
}

impl SegmentManager {
    pub fn new(set: SegmentSet, next_segment_id: SegmentId) -> Self {
        Self { current: ArcSwap::from_pointee(set), lock: Mutex::new(()), next_segment_id: AtomicU64::new(next_segment_id) }
    }

    pub fn snapshot(&self) -> Arc<SegmentSet> { self.current.load_full() }

    pub fn allocate_id(&self) -> SegmentId { self.next_segment_id.fetch_add(1, Ordering::SeqCst) }

    pub fn next_segment_id(&self) -> SegmentId { self.next_segment_id.load(Ordering::SeqCst) }

    /// Compute a successor set from the current one and install it. When `f`
    /// fails nothing is swapped and the previous set stays current.
    pub fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&SegmentSet) -> Result<(SegmentSet, R)>,
    {
        let _guard = self.lock.lock();
        let current = self.current.load_full();
        let (next, out) = f(&current)?;
        self.current.store(Arc::new(next));
        Ok(out)
    }

    pub fn publish(&self, view: SegmentView) -> Result<()> {
        self.publish_with(view, |_| Ok(()))
    }

    /// Install `view` as the newest segment. `persist` sees the successor set
    /// before the swap; if it fails the current set is kept.
    pub fn publish_with<P>(&self, view: SegmentView, persist: P) -> Result<()>
    where
        P: FnOnce(&SegmentSet) -> Result<()>,
    {
        self.update(|set| {
            let next = set.with_segment(view)?;
            persist(&next)?;
            Ok((next, ()))
        })
    }

    pub fn tombstone(&self, doc_id: DocId) -> Result<SegmentId> {
        self.update(|set| {
            let (next, view) = set.with_tombstone(doc_id)?;
            Ok((next, view.id()))
        })
    }

    /// Merge `ids` in memory and swap the result in.
    pub fn merge(&self, ids: &[SegmentId]) -> Result<SegmentId> {
        self.merge_with(ids, |_, _| Ok(())).map(|m| m.id)
    }

    /// Merge `ids` and install the result. `persist` gets the successor set and
    /// the merged segment before the swap; if it fails the run stays in place.
    pub fn merge_with<P>(&self, ids: &[SegmentId], persist: P) -> Result<Merged>
    where
        P: FnOnce(&SegmentSet, &SegmentView) -> Result<()>,
    {
        let started = Instant::now();
        let new_id = self.allocate_id();
        self.update(|set| {
            let merged = merge_segments(set, ids, new_id)?;
            let reclaimed = ids.iter().filter_map(|id| set.get(*id)).map(|v| v.deleted_count()).sum();
            let docs = merged.doc_count();
            let view = SegmentView::fresh(merged);
            let next = set.with_merged(ids, view.clone())?;
            persist(&next, &view)?;
            let out = Merged { id: new_id, inputs: ids.to_vec(), docs, reclaimed, elapsed: started.elapsed() };
            Ok((next, out))
        })
    }

    /// Apply `policy` until it asks for nothing more. Returns merges performed.
    pub fn maybe_merge(&self, policy: &MergePolicy) -> Result<usize> {
        self.maybe_merge_with(policy, |_, _| Ok(()), |_| {})
    }

    /// `maybe_merge` with a `persist` hook run before every swap (see
    /// `merge_with`) and a `retired` hook run after it.
    pub fn maybe_merge_with<P, R>(&self, policy: &MergePolicy, mut persist: P, mut retired: R) -> Result<usize>
    where
        P: FnMut(&SegmentSet, &SegmentView) -> Result<()>,
        R: FnMut(&Merged),
    {
        let mut merges = 0;
        while let Some(ids) = self.snapshot().plan(policy) {
            let merged = self.merge_with(&ids, &mut persist)?;
            retired(&merged);
            merges += 1;
        }
        Ok(merges)
    }
}

/// Outcome of one merge.
#[derive(Debug, Clone)]
pub struct Merged {
    pub id: SegmentId,
    /// The run the new segment replaced.
    pub inputs: Vec<SegmentId>,
    pub docs: usize,
    /// Tombstoned documents dropped by the merge.
    pub reclaimed: usize,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::tokenizer::Analyzer;

    fn batch(builder: &mut IndexBuilder, analyzer: &Analyzer, id: SegmentId, docs: &[(&str, &str)]) -> SegmentView {
        for (ext, text) in docs {
            builder.add_document(analyzer, ext, text).unwrap();
        }
        let (seg, tomb) = builder.build_segment(id).unwrap();
        builder.reset();
        SegmentView::new(Arc::new(seg), Arc::new(tomb)).unwrap()
    }

    fn two_segments() -> SegmentManager {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        let mgr = SegmentManager::new(SegmentSet::default(), 0);
        let s0 = batch(&mut b, &analyzer, mgr.allocate_id(), &[("a", "red fox"), ("b", "blue whale")]);
        let s1 = batch(&mut b, &analyzer, mgr.allocate_id(), &[("c", "red panda"), ("d", "fox den")]);
        mgr.publish(s0).unwrap();
        mgr.publish(s1).unwrap();
        mgr
    }

    #[test]
    fn snapshot_isolation() {
        let mgr = two_segments();
        let before = mgr.snapshot();
        mgr.tombstone(1).unwrap();
        assert!(before.is_live(1));
        assert!(!mgr.snapshot().is_live(1));
        assert!(mgr.snapshot().generation() > before.generation());
        assert!(matches!(mgr.tombstone(1), Err(SearchyError::NotFound(_))));
        assert!(matches!(mgr.tombstone(77), Err(SearchyError::NotFound(_))));
    }

    #[test]
    fn merge_drops_tombstones_and_dead_terms() {
        let mgr = two_segments();
        mgr.tombstone(1).unwrap(); // "blue whale"
        let ids = mgr.snapshot().ids();
        let merged_id = mgr.merge(&ids).unwrap();
        let set = mgr.snapshot();
        assert_eq!(set.ids(), vec![merged_id]);
        let seg = set.views()[0].segment();
        assert_eq!(seg.doc_ids().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(seg.dictionary().lookup("whale").is_none());
        assert_eq!(seg.dictionary().term_stats("red").unwrap().doc_freq, 2);
        assert_eq!(seg.postings("fox").unwrap().iter().map(|p| p.doc_id).collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(set.deleted_docs(), 0);
    }

    #[test]
    fn failed_update_keeps_old_set() {
        let mgr = two_segments();
        let before = mgr.snapshot();
        let err = mgr.update::<_, ()>(|_| Err(SearchyError::Io(std::io::Error::other("disk full"))));
        assert!(err.is_err());
        assert_eq!(mgr.snapshot().generation(), before.generation());
    }

    #[test]
    fn merge_rejects_unknown_or_gapped_runs() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        let mgr = SegmentManager::new(SegmentSet::default(), 0);
        for i in 0..3 {
            let name = format!("d{i}");
            let v = batch(&mut b, &analyzer, mgr.allocate_id(), &[(name.as_str(), "word")]);
            mgr.publish(v).unwrap();
        }
        assert!(matches!(mgr.merge(&[0, 2]), Err(SearchyError::Validation(_))));
        assert!(matches!(mgr.merge(&[0, 9]), Err(SearchyError::NotFound(_))));
        assert_eq!(mgr.snapshot().len(), 3);
    }

    #[test]
    fn policy_bounds_fan_out() {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        let mgr = SegmentManager::new(SegmentSet::default(), 0);
        for i in 0..5 {
            let name = format!("d{i}");
            let v = batch(&mut b, &analyzer, mgr.allocate_id(), &[(name.as_str(), "word")]);
            mgr.publish(v).unwrap();
        }
        let policy = MergePolicy { max_segments: 3, tombstone_ratio: 0.5, min_merge: 2 };
        assert!(mgr.maybe_merge(&policy).unwrap() >= 1);
        let set = mgr.snapshot();
        assert!(set.len() <= 3);
        assert_eq!(set.live_docs(), 5);
    }

    #[test]
    fn policy_reclaims_tombstones() {
        let mgr = two_segments();
        mgr.tombstone(2).unwrap();
        let policy = MergePolicy { max_segments: 8, tombstone_ratio: 0.5, min_merge: 2 };
        assert_eq!(mgr.snapshot().plan(&policy), None);
        let policy = MergePolicy { tombstone_ratio: 0.25, ..policy };
        assert_eq!(mgr.maybe_merge(&policy).unwrap(), 1);
        let set = mgr.snapshot();
        assert_eq!(set.len(), 2);
        assert_eq!(set.deleted_docs(), 0);
        assert_eq!(set.live_docs(), 3);
    }

    #[test]
    fn persist_hook_gates_the_swap() {
        let mgr = two_segments();
        mgr.tombstone(1).unwrap();
        let ids = mgr.snapshot().ids();
        let before = mgr.snapshot();
        let err = mgr.merge_with(&ids, |_, _| Err(SearchyError::Io(std::io::Error::other("disk full"))));
        assert!(matches!(err, Err(SearchyError::Io(_))));
        assert_eq!(mgr.snapshot().ids(), before.ids());

        let mut seen = Vec::new();
        let merged = mgr
            .merge_with(&ids, |next, view| {
                seen.push((next.ids(), view.id()));
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![(vec![merged.id], merged.id)]);
        assert_eq!((merged.inputs, merged.docs, merged.reclaimed), (ids, 3, 1));
    }

    #[test]
    fn policy_hooks_see_every_merge() {
        let mgr = two_segments();
        mgr.tombstone(2).unwrap();
        let policy = MergePolicy { max_segments: 8, tombstone_ratio: 0.25, min_merge: 2 };
        let (mut persisted, mut retired) = (0, Vec::new());
        let n = mgr
            .maybe_merge_with(
                &policy,
                |_, _| {
                    persisted += 1;
                    Ok(())
                },
                |m| retired.extend(m.inputs.iter().copied()),
            )
            .unwrap();
        assert_eq!((n, persisted), (1, 1));
        assert_eq!(retired, vec![1]);
    }

    #[test]
    fn fully_deleted_segment_disappears() {
        let mgr = two_segments();
        mgr.tombstone(0).unwrap();
        mgr.tombstone(1).unwrap();
        let first = mgr.snapshot().ids()[0];
        mgr.merge(&[first]).unwrap();
        let set = mgr.snapshot();
        assert_eq!(set.len(), 1);
        assert_eq!(set.external_id(2), Some("c"));
    }

    #[test]
    fn find_by_doc() {
        let mgr = two_segments();
        let set = mgr.snapshot();
        assert_eq!(set.external_id(0), Some("a"));
        assert_eq!(set.external_id(3), Some("d"));
        assert_eq!(set.external_id(4), None);
        assert_eq!(set.avgdl(), 2.0);
    }
}
