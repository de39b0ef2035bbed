//! Query language and evaluation.
//!
//! Queries parse into a [`QueryNode`] tree whose leaves hold analyzed terms,
//! and are evaluated by structural recursion against a segment snapshot.

mod eval;
mod parser;

pub use eval::{Deadline, Searcher};
pub use parser::{parse, MAX_DEPTH};

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Term(String),
    /// Terms with their offsets relative to the first one.
    Phrase(Vec<(String, u32)>),
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
    /// Analyzed to nothing, e.g. a lone stop word. Neutral inside AND/OR.
    Empty,
}

impl QueryNode {
    /// Remove `Empty` clauses and collapse single-child groups.
    pub fn simplify(self) -> QueryNode {
        match self {
            QueryNode::And(children) => group(children, QueryNode::And),
            QueryNode::Or(children) => group(children, QueryNode::Or),
            QueryNode::Not(inner) => match inner.simplify() {
                QueryNode::Empty => QueryNode::Empty,
                other => QueryNode::Not(Box::new(other)),
            },
            other => other,
        }
    }

    /// Distinct terms referenced by positive clauses, for callers that want
    /// to highlight matches.
    pub fn terms(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_terms(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_terms<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            QueryNode::Term(t) => out.push(t),
            QueryNode::Phrase(parts) => out.extend(parts.iter().map(|(t, _)| t.as_str())),
            QueryNode::And(c) | QueryNode::Or(c) => c.iter().for_each(|n| n.collect_terms(out)),
            QueryNode::Not(_) | QueryNode::Empty => {}
        }
    }
}

fn group(children: Vec<QueryNode>, make: fn(Vec<QueryNode>) -> QueryNode) -> QueryNode {
    let mut kept: Vec<QueryNode> = children
        .into_iter()
        .map(QueryNode::simplify)
        .filter(|c| *c != QueryNode::Empty)
        .collect();
    match kept.len() {
        0 => QueryNode::Empty,
        1 => kept.pop().unwrap_or(QueryNode::Empty),
        _ => make(kept),
    }
}
