use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Result, SearchyError, TermId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStats {
    /// Documents containing the term.
    pub doc_freq: u32,
    /// Total occurrences across all documents.
    pub coll_freq: u64,
}

/// Term string to dense term id. Statistics live in a vector indexed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "DictionaryTable", into = "DictionaryTable")]
pub struct TermDictionary {
    ids: HashMap<String, TermId>,
    terms: Vec<String>,
    stats: Vec<TermStats>,
}

/// On-disk form: the id map is rebuilt from the term table on load.
#[derive(Serialize, Deserialize)]
struct DictionaryTable {
    terms: Vec<String>,
    stats: Vec<TermStats>,
}

impl From<TermDictionary> for DictionaryTable {
    fn from(d: TermDictionary) -> Self { Self { terms: d.terms, stats: d.stats } }
}

impl TryFrom<DictionaryTable> for TermDictionary {
    type Error = String;

    fn try_from(table: DictionaryTable) -> std::result::Result<Self, String> {
        if table.terms.len() != table.stats.len() {
            return Err(format!("{} terms but {} stats entries", table.terms.len(), table.stats.len()));
        }
        let ids: HashMap<String, TermId> = table.terms.iter().enumerate().map(|(i, t)| (t.clone(), i as TermId)).collect();
        if ids.len() != table.terms.len() {
            return Err("duplicate term in dictionary table".to_string());
        }
        Ok(Self { ids, terms: table.terms, stats: table.stats })
    }
}

impl TermDictionary {
    pub fn new() -> Self { Self::default() }

    /// Existing id, or the next unused one.
    pub fn intern(&mut self, term: &str) -> TermId {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = self.terms.len() as TermId;
        self.ids.insert(term.to_string(), id);
        self.terms.push(term.to_string());
        self.stats.push(TermStats::default());
        id
    }

    pub fn lookup(&self, term: &str) -> Option<TermId> { self.ids.get(term).copied() }

    pub fn term(&self, id: TermId) -> Option<&str> { self.terms.get(id as usize).map(String::as_str) }

    pub fn stats(&self, id: TermId) -> Result<TermStats> {
        self.stats
            .get(id as usize)
            .copied()
            .ok_or_else(|| SearchyError::UnknownTerm(format!("term id {id}")))
    }

    /// Stats by term string; `UnknownTerm` when absent.
    pub fn term_stats(&self, term: &str) -> Result<TermStats> {
        match self.lookup(term) {
            Some(id) => self.stats(id),
            None => Err(SearchyError::UnknownTerm(term.to_string())),
        }
    }

    /// Account for one more document holding `freq` occurrences of `id`.
    pub fn record(&mut self, id: TermId, freq: u32) -> Result<()> {
        let stats = self
            .stats
            .get_mut(id as usize)
            .ok_or_else(|| SearchyError::UnknownTerm(format!("term id {id}")))?;
        stats.doc_freq += 1;
        stats.coll_freq += freq as u64;
        Ok(())
    }

    /// Terms in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TermId, &str, TermStats)> + '_ {
        self.terms.iter().zip(self.stats.iter()).enumerate().map(|(i, (t, s))| (i as TermId, t.as_str(), *s))
    }

    pub fn len(&self) -> usize { self.terms.len() }

    pub fn is_empty(&self) -> bool { self.terms.is_empty() }
}
