use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;
use std::ops::Range;

use crate::config::{AnalyzerConfig, Language, StopWords};

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{M}\p{N}_']*").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// A normalized term with its word position and byte offsets in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    /// Word ordinal; stop words and dropped tokens still advance it.
    pub position: u32,
    pub offset: Range<usize>,
}

enum StopSet {
    Builtin,
    Empty,
    Custom(HashSet<String>),
}

impl StopSet {
    fn contains(&self, token: &str) -> bool {
        match self {
            StopSet::Builtin => STOPWORDS.contains(token),
            StopSet::Empty => false,
            StopSet::Custom(set) => set.contains(token),
        }
    }
}

/// Turns raw text into terms. Pure: the same text and configuration always yield the same tokens.
pub struct Analyzer {
    lowercase: bool,
    stemmer: Option<Stemmer>,
    stop_words: StopSet,
    max_token_len: usize,
}

fn algorithm(lang: Language) -> Algorithm {
    match lang {
        Language::English => Algorithm::English,
        Language::French => Algorithm::French,
        Language::German => Algorithm::German,
        Language::Italian => Algorithm::Italian,
        Language::Portuguese => Algorithm::Portuguese,
        Language::Spanish => Algorithm::Spanish,
    }
}

impl Analyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let stop_words = match &config.stop_words {
            StopWords::Default => StopSet::Builtin,
            StopWords::None => StopSet::Empty,
            StopWords::Custom(words) => StopSet::Custom(words.iter().map(|w| w.to_lowercase()).collect()),
        };
        Self {
            lowercase: config.lowercase,
            stemmer: config.stemming.map(|l| Stemmer::create(algorithm(l))),
            stop_words,
            max_token_len: config.max_token_len.max(1),
        }
    }

    /// Lazily analyze `text`. The returned iterator is cheap to clone, so a
    /// consumer can restart it from any point.
    pub fn analyze<'a>(&'a self, text: &'a str) -> Tokens<'a> {
        Tokens { analyzer: self, text, cursor: 0, position: 0 }
    }

    /// Terms only, in order.
    pub fn terms(&self, text: &str) -> Vec<String> {
        self.analyze(text).map(|t| t.term).collect()
    }

    /// Normalize a single surface word; `None` when it is filtered out.
    fn normalize(&self, raw: &str) -> Option<String> {
        let mut word: String = raw.nfkc().collect();
        if self.lowercase {
            word = word.to_lowercase();
        }
        if word.len() > self.max_token_len || self.stop_words.contains(&word) {
            return None;
        }
        match &self.stemmer {
            Some(stemmer) => Some(stemmer.stem(&word).into_owned()),
            None => Some(word),
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self { Self::new(&AnalyzerConfig::default()) }
}

#[derive(Clone)]
pub struct Tokens<'a> {
    analyzer: &'a Analyzer,
    text: &'a str,
    cursor: usize,
    position: u32,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while let Some(mat) = RE.find_at(self.text, self.cursor) {
            self.cursor = mat.end();
            let position = self.position;
            self.position += 1;
            if let Some(term) = self.analyzer.normalize(mat.as_str()) {
                return Some(Token { term, position, offset: mat.range() });
            }
        }
        self.cursor = self.text.len();
        None
    }
}

/// Tokenize text into (term, position) with the default English analysis chain.
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    lazy_static! {
        static ref DEFAULT: Analyzer = Analyzer::default();
    }
    DEFAULT.analyze(text).map(|t| (t.term, t.position as usize)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Running, runner's run!");
        assert!(t.iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn offsets_point_into_source() {
        let text = "The Quick  fox";
        let a = Analyzer::default();
        let toks: Vec<Token> = a.analyze(text).collect();
        assert_eq!(toks.len(), 2);
        assert_eq!(&text[toks[0].offset.clone()], "Quick");
        assert_eq!(toks[0].term, "quick");
        assert_eq!(toks[0].position, 1);
        assert_eq!(toks[1].position, 2);
    }

    #[test]
    fn restartable_by_clone() {
        let a = Analyzer::default();
        let mut toks = a.analyze("alpha beta gamma");
        toks.next();
        let rest: Vec<_> = toks.clone().collect();
        let again: Vec<_> = toks.collect();
        assert_eq!(rest, again);
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn no_stemming_no_stopwords() {
        let cfg = AnalyzerConfig { stemming: None, stop_words: StopWords::None, ..Default::default() };
        let a = Analyzer::new(&cfg);
        assert_eq!(a.terms("The jumping Foxes"), vec!["the", "jumping", "foxes"]);
    }

    #[test]
    fn long_tokens_dropped_but_counted() {
        let cfg = AnalyzerConfig { max_token_len: 4, stemming: None, ..Default::default() };
        let a = Analyzer::new(&cfg);
        let toks: Vec<Token> = a.analyze("tiny enormous word").collect();
        assert_eq!(toks.iter().map(|t| t.term.as_str()).collect::<Vec<_>>(), vec!["tiny", "word"]);
        assert_eq!(toks[1].position, 2);
    }
}
