//! Sliding-window chunker for content without a symbol extractor.

use super::SymbolExtractor;
use crate::error::RefineResult;
use crate::types::{ExtractedUnit, UnitKind};
use std::path::{Component, Path};

#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
    line: usize,
}

/// Splits text into windows of `window` whitespace-separated tokens, each
/// overlapping the previous by `overlap` tokens.
///
/// Chunk content is the exact source slice from the first to the last token
/// of the window. An empty or all-whitespace file yields a single empty chunk.
#[derive(Debug, Clone)]
pub struct ChunkExtractor {
    window: usize,
    overlap: usize,
}

impl ChunkExtractor {
    pub fn new(window: usize, overlap: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            overlap: overlap.min(window - 1),
        }
    }

    fn step(&self) -> usize {
        (self.window - self.overlap).max(1)
    }
}

impl Default for ChunkExtractor {
    fn default() -> Self {
        Self::new(500, 100)
    }
}

impl SymbolExtractor for ChunkExtractor {
    fn language(&self) -> &str {
        "text"
    }

    fn extensions(&self) -> &[&str] {
        &["md", "txt", "rst"]
    }

    fn extract(&self, path: &Path, content: &str) -> RefineResult<Vec<ExtractedUnit>> {
        let id_base = slash_path(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id_base.clone());

        let tokens = tokenize(content);
        if tokens.is_empty() {
            return Ok(vec![ExtractedUnit {
                unit_id: format!("{id_base}#0"),
                name,
                kind: UnitKind::Chunk,
                start_line: 1,
                end_line: 1,
                content: String::new(),
            }]);
        }

        let mut units = Vec::new();
        for (index, start) in (0..tokens.len()).step_by(self.step()).enumerate() {
            let end = (start + self.window).min(tokens.len());
            let first = tokens[start];
            let last = tokens[end - 1];
            units.push(ExtractedUnit {
                unit_id: format!("{id_base}#{index}"),
                name: name.clone(),
                kind: UnitKind::Chunk,
                start_line: first.line,
                end_line: last.line,
                content: content[first.start..last.end].to_string(),
            });
            if end == tokens.len() {
                break;
            }
        }
        Ok(units)
    }
}

fn tokenize(content: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut open: Option<(usize, usize)> = None;

    for (i, ch) in content.char_indices() {
        if ch.is_whitespace() {
            if let Some((start, start_line)) = open.take() {
                tokens.push(Token {
                    start,
                    end: i,
                    line: start_line,
                });
            }
            if ch == '\n' {
                line += 1;
            }
        } else if open.is_none() {
            open = Some((i, line));
        }
    }
    if let Some((start, start_line)) = open {
        tokens.push(Token {
            start,
            end: content.len(),
            line: start_line,
        });
    }
    tokens
}

/// Platform-independent identifier form of a relative path.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
