use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Deserialize)]
pub struct InputDoc {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub body: String,
}

impl InputDoc {
    /// Title and body, as indexed.
    pub fn text(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => format!("{t}\n{}", self.body),
            _ => self.body.clone(),
        }
    }
}

/// Corpus files under `input`, in a stable order.
pub fn files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input {} does not exist", input.display());
    }
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl" | "txt")))
        .collect();
    files.sort();
    Ok(files)
}

/// Feed every document of `file` to `sink`.
pub fn read_file<F>(file: &Path, sink: &mut F) -> Result<usize>
where
    F: FnMut(InputDoc) -> Result<()>,
{
    let ext = file.extension().and_then(|s| s.to_str()).unwrap_or_default();
    let mut n = 0;
    match ext {
        "jsonl" => {
            let reader = BufReader::new(File::open(file)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() { continue; }
                let doc: InputDoc = serde_json::from_str(&line)
                    .with_context(|| format!("{}:{}", file.display(), lineno + 1))?;
                sink(doc)?;
                n += 1;
            }
        }
        "json" => {
            let reader = BufReader::new(File::open(file)?);
            let json: serde_json::Value = serde_json::from_reader(reader).with_context(|| file.display().to_string())?;
            let values = match json {
                serde_json::Value::Array(arr) => arr,
                obj @ serde_json::Value::Object(_) => vec![obj],
                _ => bail!("{}: expected an object or an array", file.display()),
            };
            for v in values {
                sink(serde_json::from_value(v)?)?;
                n += 1;
            }
        }
        _ => {
            let id = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
            let body = std::fs::read_to_string(file)?;
            sink(InputDoc { id, title: None, body })?;
            n += 1;
        }
    }
    Ok(n)
}

/// Word vectors in fastText text format: a header line, then one word and its
/// components per line.
pub struct Embeddings {
    pub words: Vec<String>,
    pub vectors: Vec<Vec<f32>>,
}

pub fn read_vec_file(path: &Path, max_records: Option<usize>) -> Result<Embeddings> {
    let reader = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    let mut out = Embeddings { words: Vec::new(), vectors: Vec::new() };
    for (lineno, line) in reader.lines().enumerate().skip(1) {
        if max_records.is_some_and(|m| out.vectors.len() >= m) {
            break;
        }
        let line = line?;
        let mut cols = line.split_whitespace();
        let Some(word) = cols.next() else { continue };
        let vector = cols
            .map(|c| c.parse::<f32>())
            .collect::<std::result::Result<Vec<f32>, _>>()
            .with_context(|| format!("{}:{}", path.display(), lineno + 1))?;
        out.words.push(word.to_string());
        out.vectors.push(vector);
    }
    Ok(out)
}
