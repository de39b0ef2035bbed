use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::IndexConfig;
use crate::segment::{Segment, Tombstones};
use crate::{DocId, Result, SearchyError, SegmentId};

/// Current on-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub created_at: String,
    pub updated_at: String,
    pub config: IndexConfig,
    pub next_doc_id: DocId,
    pub next_segment_id: SegmentId,
    /// Live segments, in doc order.
    pub segments: Vec<SegmentId>,
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

/// Directory layout of a persisted index:
///
/// ```text
/// <root>/manifest.json
/// <root>/segments/00000003.seg   bincode segment
/// <root>/segments/00000003.del   bincode tombstones, absent when none
/// ```
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn manifest(&self) -> PathBuf { self.root.join("manifest.json") }
    fn segments_dir(&self) -> PathBuf { self.root.join("segments") }
    pub fn segment(&self, id: SegmentId) -> PathBuf { self.segments_dir().join(format!("{id:08}.seg")) }
    pub fn tombstones(&self, id: SegmentId) -> PathBuf { self.segments_dir().join(format!("{id:08}.del")) }

    pub fn exists(&self) -> bool { self.manifest().is_file() }
}

/// Write to a sibling temp file, sync, then rename over `path`. Readers see
/// either the old file or the complete new one.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn save_segment(paths: &IndexPaths, segment: &Segment) -> Result<()> {
    write_atomic(&paths.segment(segment.id()), &segment.to_bytes()?)
}

pub fn load_segment(paths: &IndexPaths, id: SegmentId) -> Result<Segment> {
    let segment = Segment::from_bytes(&read_all(&paths.segment(id))?)?;
    if segment.id() != id {
        return Err(SearchyError::Consistency(format!("file for segment {id} holds segment {}", segment.id())));
    }
    Ok(segment)
}

/// Empty tombstones are stored as the absence of a file.
pub fn save_tombstones(paths: &IndexPaths, id: SegmentId, tombstones: &Tombstones) -> Result<()> {
    let path = paths.tombstones(id);
    if tombstones.is_empty() {
        if path.exists() {
            fs::remove_file(path)?;
        }
        return Ok(());
    }
    write_atomic(&path, &bincode::serialize(tombstones)?)
}

pub fn load_tombstones(paths: &IndexPaths, id: SegmentId, doc_count: usize) -> Result<Tombstones> {
    let path = paths.tombstones(id);
    if !path.exists() {
        return Ok(Tombstones::new(doc_count));
    }
    let tombstones: Tombstones = bincode::deserialize(&read_all(&path)?)?;
    Ok(tombstones)
}

pub fn save_manifest(paths: &IndexPaths, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    write_atomic(&paths.manifest(), &json)
}

pub fn load_manifest(paths: &IndexPaths) -> Result<Manifest> {
    let manifest: Manifest = serde_json::from_slice(&read_all(&paths.manifest())?)?;
    if manifest.version > FORMAT_VERSION {
        return Err(SearchyError::Validation(format!(
            "index format {} is newer than supported {FORMAT_VERSION}", manifest.version
        )));
    }
    Ok(manifest)
}

/// Remove the files of a retired segment. Missing files are fine.
pub fn remove_segment_files(paths: &IndexPaths, id: SegmentId) -> Result<()> {
    for path in [paths.segment(id), paths.tombstones(id)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IndexBuilder;
    use crate::tokenizer::Analyzer;
    use tempfile::tempdir;

    fn segment() -> (Segment, Tombstones) {
        let analyzer = Analyzer::default();
        let mut b = IndexBuilder::new(0);
        b.add_document(&analyzer, "a", "the quick fox").unwrap();
        b.add_document(&analyzer, "b", "the slow fox jumps").unwrap();
        b.build_segment(4).unwrap()
    }

    #[test]
    fn segment_file_round_trip() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let (seg, _) = segment();
        save_segment(&paths, &seg).unwrap();
        let back = load_segment(&paths, 4).unwrap();
        assert_eq!(back.docs(), seg.docs());
        assert_eq!(back.postings("fox").unwrap(), seg.postings("fox").unwrap());
        assert!(!paths.segment(4).with_extension("tmp").exists());
    }

    #[test]
    fn tombstones_absent_means_none() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let (_, mut tomb) = segment();
        assert_eq!(load_tombstones(&paths, 4, 2).unwrap().count(), 0);
        tomb.delete(1);
        save_tombstones(&paths, 4, &tomb).unwrap();
        assert_eq!(load_tombstones(&paths, 4, 2).unwrap(), tomb);
        save_tombstones(&paths, 4, &Tombstones::new(2)).unwrap();
        assert!(!paths.tombstones(4).exists());
    }

    #[test]
    fn manifest_round_trip() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        assert!(!paths.exists());
        let m = Manifest {
            version: FORMAT_VERSION,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
            config: IndexConfig::default(),
            next_doc_id: 12,
            next_segment_id: 3,
            segments: vec![0, 2],
        };
        save_manifest(&paths, &m).unwrap();
        let back = load_manifest(&paths).unwrap();
        assert_eq!(back.segments, vec![0, 2]);
        assert_eq!(back.next_doc_id, 12);
        assert_eq!(back.config, IndexConfig::default());
    }

    #[test]
    fn wrong_segment_id_is_consistency_error() {
        let dir = tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let (seg, _) = segment();
        save_segment(&paths, &seg).unwrap();
        fs::rename(paths.segment(4), paths.segment(5)).unwrap();
        assert!(matches!(load_segment(&paths, 5), Err(SearchyError::Consistency(_))));
        assert!(matches!(load_segment(&paths, 4), Err(SearchyError::Io(_))));
    }
}
