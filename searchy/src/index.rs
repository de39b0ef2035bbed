//! The index instance: one writer at a time, any number of concurrent readers.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::IndexBuilder;
use crate::config::IndexConfig;
use crate::manager::{Merged, SegmentManager, SegmentSet};
use crate::persist::{self, IndexPaths, Manifest, FORMAT_VERSION};
use crate::query::{parse, Deadline, QueryNode, Searcher};
use crate::scorer::Bm25;
use crate::segment::SegmentView;
use crate::tokenizer::Analyzer;
use crate::{DocId, Result, SearchyError, SegmentId};

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub external_id: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub segments: usize,
    pub live_docs: u64,
    pub deleted_docs: u64,
    /// Added but not yet flushed.
    pub buffered_docs: usize,
    /// Sum of per-segment dictionary sizes.
    pub terms: usize,
    pub generation: u64,
}

struct Writer {
    builder: IndexBuilder,
    /// External id -> live doc id, buffered and flushed.
    live: HashMap<String, DocId>,
    /// Segments whose tombstones changed since the last commit.
    dirty: BTreeSet<SegmentId>,
}

pub struct Index {
    config: IndexConfig,
    analyzer: Analyzer,
    scorer: Bm25,
    paths: Option<IndexPaths>,
    created_at: String,
    writer: Mutex<Writer>,
    segments: SegmentManager,
}

impl Index {
    /// An index that lives only in memory.
    pub fn in_memory(config: IndexConfig) -> Self {
        Self::assemble(config, None, persist::now_rfc3339(), SegmentSet::default(), 0, 0)
    }

    /// Open the index at `path`, creating it with `config` when no manifest
    /// exists. An existing index runs with the config stored in its manifest;
    /// `config` is then ignored.
    pub fn open<P: AsRef<Path>>(path: P, config: IndexConfig) -> Result<Self> {
        let paths = IndexPaths::new(path);
        if !paths.exists() {
            let index = Self::assemble(config, Some(paths), persist::now_rfc3339(), SegmentSet::default(), 0, 0);
            index.write_manifest(&index.segments.snapshot(), 0)?;
            tracing::info!(root = %index.root_display(), "created index");
            return Ok(index);
        }
        let manifest = persist::load_manifest(&paths)?;
        if config != manifest.config {
            tracing::warn!(root = %paths.root.display(), "config differs from the stored index; using the stored one");
        }
        Self::reopen(paths, manifest)
    }

    /// Open an index that must already exist, with its stored config.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let paths = IndexPaths::new(path);
        if !paths.exists() {
            return Err(SearchyError::NotFound(format!("no index at {}", paths.root.display())));
        }
        let manifest = persist::load_manifest(&paths)?;
        Self::reopen(paths, manifest)
    }

    fn reopen(paths: IndexPaths, manifest: Manifest) -> Result<Self> {
        let mut views = Vec::with_capacity(manifest.segments.len());
        for id in &manifest.segments {
            let segment = persist::load_segment(&paths, *id)?;
            let tombstones = persist::load_tombstones(&paths, *id, segment.doc_count())?;
            views.push(SegmentView::new(Arc::new(segment), Arc::new(tombstones))?);
        }
        if let Some(max) = views.iter().filter_map(|v| v.segment().doc_range()).map(|r| r.end).max() {
            if max > manifest.next_doc_id {
                return Err(SearchyError::Consistency(format!(
                    "segments hold doc {} but next doc id is {}", max - 1, manifest.next_doc_id
                )));
            }
        }
        let set = SegmentSet::new(0, views)?;
        let index =
            Self::assemble(manifest.config, Some(paths), manifest.created_at, set, manifest.next_doc_id, manifest.next_segment_id);
        let stats = index.stats();
        tracing::info!(root = %index.root_display(), segments = stats.segments, live_docs = stats.live_docs, "opened index");
        Ok(index)
    }

    fn assemble(
        config: IndexConfig,
        paths: Option<IndexPaths>,
        created_at: String,
        set: SegmentSet,
        next_doc_id: DocId,
        next_segment_id: SegmentId,
    ) -> Self {
        let mut live = HashMap::new();
        for view in set.views() {
            for doc in view.live_docs() {
                live.insert(doc.external_id.clone(), doc.doc_id);
            }
        }
        Self {
            analyzer: Analyzer::new(&config.analyzer),
            scorer: Bm25::new(config.bm25),
            writer: Mutex::new(Writer { builder: IndexBuilder::new(next_doc_id), live, dirty: BTreeSet::new() }),
            segments: SegmentManager::new(set, next_segment_id),
            config,
            paths,
            created_at,
        }
    }

    fn root_display(&self) -> String {
        self.paths.as_ref().map(|p| p.root.display().to_string()).unwrap_or_else(|| "<memory>".into())
    }

    pub fn config(&self) -> &IndexConfig { &self.config }

    pub fn analyzer(&self) -> &Analyzer { &self.analyzer }

    pub fn is_persistent(&self) -> bool { self.paths.is_some() }

    /// Current segment snapshot; stays valid however the index changes later.
    pub fn snapshot(&self) -> Arc<SegmentSet> { self.segments.snapshot() }

    /// Index `text` under `external_id`. The document becomes searchable at the
    /// next flush.
    pub fn add_document(&self, external_id: &str, text: &str) -> Result<DocId> {
        let mut w = self.writer.lock();
        self.add_locked(&mut w, external_id, text)
    }

    fn add_locked(&self, w: &mut Writer, external_id: &str, text: &str) -> Result<DocId> {
        if w.live.contains_key(external_id) {
            return Err(SearchyError::Validation(format!("document {external_id:?} is already indexed")));
        }
        let doc_id = w.builder.add_document(&self.analyzer, external_id, text)?;
        w.live.insert(external_id.to_string(), doc_id);
        if self.config.flush_threshold == 0 || w.builder.len() < self.config.flush_threshold {
            return Ok(doc_id);
        }
        // a failed add leaves no trace; the rest of the batch stays buffered
        if let Err(e) = self.publish_batch(w) {
            w.builder.retract(doc_id);
            w.live.remove(external_id);
            return Err(e);
        }
        // the document is published either way; the next flush or commit retries the merge
        if let Err(e) = self.merge_by_policy(w) {
            tracing::warn!(doc_id, error = %e, "merge after automatic flush failed");
        }
        Ok(doc_id)
    }

    /// Replace the document stored under `external_id`, if any.
    pub fn update_document(&self, external_id: &str, text: &str) -> Result<DocId> {
        let mut w = self.writer.lock();
        if let Some(doc_id) = w.live.get(external_id).copied() {
            self.delete_locked(&mut w, doc_id)?;
        }
        self.add_locked(&mut w, external_id, text)
    }

    /// Tombstone a document. `NotFound` if unknown or already deleted.
    pub fn delete_document(&self, doc_id: DocId) -> Result<()> {
        let mut w = self.writer.lock();
        self.delete_locked(&mut w, doc_id)
    }

    pub fn delete_by_external_id(&self, external_id: &str) -> Result<DocId> {
        let mut w = self.writer.lock();
        let doc_id = w
            .live
            .get(external_id)
            .copied()
            .ok_or_else(|| SearchyError::NotFound(format!("document {external_id:?}")))?;
        self.delete_locked(&mut w, doc_id)?;
        Ok(doc_id)
    }

    fn delete_locked(&self, w: &mut Writer, doc_id: DocId) -> Result<()> {
        if let Some(external) = w.builder.external_id(doc_id).map(str::to_string) {
            w.builder.delete(doc_id)?;
            w.live.remove(&external);
            return Ok(());
        }
        let snapshot = self.segments.snapshot();
        let external = snapshot
            .external_id(doc_id)
            .map(str::to_string)
            .ok_or_else(|| SearchyError::NotFound(format!("doc {doc_id}")))?;
        let segment = self.segments.tombstone(doc_id)?;
        w.live.remove(&external);
        w.dirty.insert(segment);
        tracing::debug!(doc_id, segment, "tombstoned");
        Ok(())
    }

    /// Live doc id for an external id, buffered documents included.
    pub fn doc_id(&self, external_id: &str) -> Option<DocId> { self.writer.lock().live.get(external_id).copied() }

    /// Turn buffered documents into a segment. `None` when nothing was buffered.
    pub fn flush(&self) -> Result<Option<SegmentId>> {
        let mut w = self.writer.lock();
        self.flush_locked(&mut w)
    }

    fn flush_locked(&self, w: &mut Writer) -> Result<Option<SegmentId>> {
        let id = self.publish_batch(w)?;
        if id.is_some() {
            self.merge_by_policy(w)?;
        }
        Ok(id)
    }

    /// Write the buffered batch as a segment and make it current.
    fn publish_batch(&self, w: &mut Writer) -> Result<Option<SegmentId>> {
        if w.builder.is_empty() {
            return Ok(None);
        }
        let id = self.segments.allocate_id();
        let (segment, tombstones) = w.builder.build_segment(id)?;
        let (docs, terms) = (segment.doc_count(), segment.dictionary().len());
        let view = SegmentView::new(Arc::new(segment), Arc::new(tombstones))?;
        let next_doc_id = w.builder.next_doc_id();
        self.segments
            .publish_with(view.clone(), |next| {
                let Some(paths) = &self.paths else { return Ok(()) };
                persist::save_segment(paths, view.segment())?;
                persist::save_tombstones(paths, id, view.tombstones())?;
                self.write_manifest(next, next_doc_id)
            })
            .inspect_err(|e| tracing::warn!(segment = id, error = %e, "flush failed; batch kept"))?;
        w.builder.reset();
        tracing::info!(segment = id, docs, terms, "flushed segment");
        Ok(Some(id))
    }

    fn merge_by_policy(&self, w: &mut Writer) -> Result<usize> {
        let next_doc_id = w.builder.next_doc_id();
        let dirty = &mut w.dirty;
        self.segments
            .maybe_merge_with(
                &self.config.merge,
                |next, view| self.persist_merge(next, view, next_doc_id),
                |merged| self.retire(dirty, merged),
            )
            .inspect_err(|e| tracing::warn!(error = %e, "merge failed; segments unchanged"))
    }

    /// Merge every live segment into one.
    pub fn merge_all(&self) -> Result<Option<SegmentId>> {
        let mut w = self.writer.lock();
        let ids = self.segments.snapshot().ids();
        if ids.is_empty() {
            return Ok(None);
        }
        self.merge_locked(&mut w, &ids).map(Some)
    }

    /// Merge an adjacent run of segments.
    pub fn merge(&self, ids: &[SegmentId]) -> Result<SegmentId> {
        let mut w = self.writer.lock();
        self.merge_locked(&mut w, ids)
    }

    fn merge_locked(&self, w: &mut Writer, ids: &[SegmentId]) -> Result<SegmentId> {
        let next_doc_id = w.builder.next_doc_id();
        let merged = self
            .segments
            .merge_with(ids, |next, view| self.persist_merge(next, view, next_doc_id))
            .inspect_err(|e| tracing::warn!(error = %e, "merge failed; segments unchanged"))?;
        self.retire(&mut w.dirty, &merged);
        Ok(merged.id)
    }

    /// The merged segment and the manifest naming it, written before the swap.
    fn persist_merge(&self, next: &SegmentSet, view: &SegmentView, next_doc_id: DocId) -> Result<()> {
        let Some(paths) = &self.paths else { return Ok(()) };
        if view.segment().doc_count() > 0 {
            persist::save_segment(paths, view.segment())?;
        }
        self.write_manifest(next, next_doc_id)
    }

    /// Forget the inputs of a merge that is now current.
    fn retire(&self, dirty: &mut BTreeSet<SegmentId>, merged: &Merged) {
        for id in &merged.inputs {
            dirty.remove(id);
            if let Some(paths) = &self.paths {
                if let Err(e) = persist::remove_segment_files(paths, *id) {
                    tracing::warn!(segment = id, error = %e, "could not remove retired segment files");
                }
            }
        }
        tracing::info!(
            inputs = ?merged.inputs,
            output = merged.id,
            docs = merged.docs,
            reclaimed = merged.reclaimed,
            elapsed_ms = merged.elapsed.as_millis() as u64,
            "merged segments"
        );
    }

    /// Flush, apply the merge policy and make deletions durable.
    pub fn commit(&self) -> Result<()> {
        let mut w = self.writer.lock();
        self.flush_locked(&mut w)?;
        self.merge_by_policy(&mut w)?;
        if let Some(paths) = &self.paths {
            let set = self.segments.snapshot();
            for id in &w.dirty {
                if let Some(view) = set.get(*id) {
                    persist::save_tombstones(paths, *id, view.tombstones())?;
                }
            }
            self.write_manifest(&set, w.builder.next_doc_id())?;
            tracing::info!(root = %paths.root.display(), generation = set.generation(), "committed");
        }
        w.dirty.clear();
        Ok(())
    }

    /// Commit and release the index.
    pub fn close(self) -> Result<()> { self.commit() }

    fn write_manifest(&self, set: &SegmentSet, next_doc_id: DocId) -> Result<()> {
        let Some(paths) = &self.paths else { return Ok(()) };
        let manifest = Manifest {
            version: FORMAT_VERSION,
            created_at: self.created_at.clone(),
            updated_at: persist::now_rfc3339(),
            config: self.config.clone(),
            next_doc_id,
            next_segment_id: self.segments.next_segment_id(),
            segments: set.ids(),
        };
        persist::save_manifest(paths, &manifest)
    }

    /// Parse a query with this index's analyzer and default operator.
    pub fn parse_query(&self, query: &str) -> Result<QueryNode> {
        parse(query, &self.analyzer, self.config.query.default_operator)
    }

    /// Ranked results for `query`: score descending, ties by ascending doc id.
    /// With a `timeout`, evaluation past the budget fails with `Timeout`
    /// instead of returning partial results.
    pub fn search(&self, query: &str, max_results: usize, timeout: Option<Duration>) -> Result<Vec<SearchHit>> {
        let deadline = Deadline::new(timeout);
        let node = self.parse_query(query)?;
        let snapshot = self.segments.snapshot();
        let searcher = Searcher::new(&snapshot, self.scorer, deadline);
        let hits = searcher.search(&node, max_results)?;
        tracing::debug!(query, hits = hits.len(), generation = snapshot.generation(), "search");
        hits.into_iter()
            .map(|(doc_id, score)| {
                let external_id = snapshot
                    .external_id(doc_id)
                    .ok_or_else(|| SearchyError::Consistency(format!("hit {doc_id} is not live")))?;
                Ok(SearchHit { doc_id, external_id: external_id.to_string(), score })
            })
            .collect()
    }

    /// Number of live documents matching `query`.
    pub fn count(&self, query: &str) -> Result<usize> {
        let node = self.parse_query(query)?;
        let snapshot = self.segments.snapshot();
        Searcher::new(&snapshot, self.scorer, Deadline::unbounded()).count(&node)
    }

    pub fn stats(&self) -> IndexStats {
        let buffered_docs = self.writer.lock().builder.len();
        let set = self.segments.snapshot();
        IndexStats {
            segments: set.len(),
            live_docs: set.live_docs(),
            deleted_docs: set.deleted_docs(),
            buffered_docs,
            terms: set.views().iter().map(|v| v.segment().dictionary().len()).sum(),
            generation: set.generation(),
        }
    }

    /// Ingest a batch and flush it. Entry point for benchmark loops.
    pub fn ingest<I, K, T>(&self, docs: I) -> Result<Vec<DocId>>
    where
        I: IntoIterator<Item = (K, T)>,
        K: AsRef<str>,
        T: AsRef<str>,
    {
        let mut ids = Vec::new();
        for (id, text) in docs {
            ids.push(self.add_document(id.as_ref(), text.as_ref())?);
        }
        self.flush()?;
        Ok(ids)
    }
}
