//! Query string syntax:
//!
//! ```text
//! or    := and (("OR" | <implicit>) and)*
//! and   := unary (("AND" | <implicit>) unary | "NOT" unary | "-" unary)*
//! unary := ("NOT" | "-") unary | primary
//! primary := WORD | "\"" PHRASE "\"" | "(" or ")"
//! ```
//!
//! Keywords are upper case. The implicit operator between adjacent clauses is
//! configurable; `a NOT b` always means `a AND NOT b`.

use super::QueryNode;
use crate::config::Operator;
use crate::tokenizer::Analyzer;
use crate::{Result, SearchyError};

#[derive(Debug, Clone, PartialEq)]
enum Lexeme {
    Word(String),
    Quoted(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Eof,
}

fn lex(input: &str) -> Result<Vec<(Lexeme, usize)>> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => { out.push((Lexeme::LParen, i)); i += 1; }
            ')' => { out.push((Lexeme::RParen, i)); i += 1; }
            '"' => {
                let start = i;
                i += 1;
                let body_start = i;
                while i < chars.len() && chars[i] != '"' {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(SearchyError::syntax(start, "unterminated phrase"));
                }
                out.push((Lexeme::Quoted(chars[body_start..i].iter().collect()), start));
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !matches!(chars[i], '(' | ')' | '"') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "AND" | "&&" => out.push((Lexeme::And, start)),
                    "OR" | "||" => out.push((Lexeme::Or, start)),
                    "NOT" => out.push((Lexeme::Not, start)),
                    w if w.len() > 1 && w.starts_with('-') => {
                        out.push((Lexeme::Not, start));
                        out.push((Lexeme::Word(w[1..].to_string()), start + 1));
                    }
                    "-" if i < chars.len() && matches!(chars[i], '(' | '"') => out.push((Lexeme::Not, start)),
                    _ => out.push((Lexeme::Word(word), start)),
                }
            }
        }
    }
    out.push((Lexeme::Eof, chars.len()));
    Ok(out)
}

/// Deepest allowed nesting of groups and negations. Bounds recursion in the
/// parser and in everything that walks the resulting tree.
pub const MAX_DEPTH: usize = 128;

struct Parser<'a> {
    tokens: Vec<(Lexeme, usize)>,
    pos: usize,
    depth: usize,
    analyzer: &'a Analyzer,
    default_op: Operator,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Lexeme { &self.tokens[self.pos].0 }

    fn offset(&self) -> usize { self.tokens[self.pos].1 }

    fn bump(&mut self) -> (Lexeme, usize) {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn descend(&mut self, at: usize) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(SearchyError::syntax(at, "query nested too deeply"));
        }
        Ok(())
    }

    fn starts_clause(&self) -> bool {
        matches!(self.peek(), Lexeme::Word(_) | Lexeme::Quoted(_) | Lexeme::LParen)
    }

    fn parse_or(&mut self) -> Result<QueryNode> {
        let mut clauses = vec![self.parse_and()?];
        loop {
            if *self.peek() == Lexeme::Or {
                self.bump();
                clauses.push(self.parse_and()?);
            } else if self.default_op == Operator::Or && self.starts_clause() {
                clauses.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(if clauses.len() == 1 { clauses.remove(0) } else { QueryNode::Or(clauses) })
    }

    fn parse_and(&mut self) -> Result<QueryNode> {
        let mut clauses = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Lexeme::And => {
                    self.bump();
                    clauses.push(self.parse_unary()?);
                }
                Lexeme::Not => clauses.push(self.parse_unary()?),
                _ if self.default_op == Operator::And && self.starts_clause() => clauses.push(self.parse_unary()?),
                _ => break,
            }
        }
        Ok(if clauses.len() == 1 { clauses.remove(0) } else { QueryNode::And(clauses) })
    }

    fn parse_unary(&mut self) -> Result<QueryNode> {
        if *self.peek() == Lexeme::Not {
            let (_, at) = self.bump();
            self.descend(at)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(QueryNode::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<QueryNode> {
        let at = self.offset();
        match self.bump() {
            (Lexeme::Word(w), _) => Ok(self.lower(&w)),
            (Lexeme::Quoted(p), _) => Ok(self.lower(&p)),
            (Lexeme::LParen, _) => {
                if *self.peek() == Lexeme::RParen {
                    return Err(SearchyError::syntax(at, "empty group"));
                }
                self.descend(at)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.bump() {
                    (Lexeme::RParen, _) => Ok(inner),
                    (_, pos) => Err(SearchyError::syntax(pos, "expected ')'")),
                }
            }
            (Lexeme::Eof, pos) => Err(SearchyError::syntax(pos, "unexpected end of query")),
            (Lexeme::RParen, pos) => Err(SearchyError::syntax(pos, "unexpected ')'")),
            (other, pos) => Err(SearchyError::syntax(pos, format!("expected a term, found {other:?}"))),
        }
    }

    /// Analyze surface text into a leaf. Several terms become a phrase with
    /// the gaps left by stop words preserved.
    fn lower(&self, text: &str) -> QueryNode {
        let tokens: Vec<_> = self.analyzer.analyze(text).collect();
        match tokens.as_slice() {
            [] => QueryNode::Empty,
            [one] => QueryNode::Term(one.term.clone()),
            [first, ..] => {
                let base = first.position;
                QueryNode::Phrase(tokens.iter().map(|t| (t.term.clone(), t.position - base)).collect())
            }
        }
    }
}

/// Parse and analyze `input`. Blank input is a syntax error.
pub fn parse(input: &str, analyzer: &Analyzer, default_op: Operator) -> Result<QueryNode> {
    if input.trim().is_empty() {
        return Err(SearchyError::syntax(0, "empty query"));
    }
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0, analyzer, default_op };
    let node = parser.parse_or()?;
    match parser.bump() {
        (Lexeme::Eof, _) => Ok(node.simplify()),
        (Lexeme::RParen, pos) => Err(SearchyError::syntax(pos, "unbalanced ')'")),
        (other, pos) => Err(SearchyError::syntax(pos, format!("unexpected {other:?}"))),
    }
}
