//! Hierarchical chunker.
//!
//! Turns one source file into an ordered chunk sequence at three
//! granularities: a file-level chunk, definition chunks recognized by a
//! lightweight pattern-based parser, and 50-line block chunks over any
//! region no definition covers. Line ranges are 1-based and inclusive.
//! The chunker is deterministic: same text, same output.
//!
//! The same symbol scan feeds the knowledge graph, so chunking and graph
//! construction never disagree on what a definition is.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::lang::Language;

/// Block chunks cover at most this many source lines.
pub const BLOCK_CHUNK_LINES: usize = 50;

/// Definition extents are capped to keep a runaway brace scan on
/// malformed input from swallowing the rest of the file.
const MAX_DEFINITION_LINES: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Definition,
    Block,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::File => "file",
            ChunkKind::Definition => "definition",
            ChunkKind::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Option<ChunkKind> {
        match s {
            "file" => Some(ChunkKind::File),
            "definition" => Some(ChunkKind::Definition),
            "block" => Some(ChunkKind::Block),
            _ => None,
        }
    }
}

/// A chunk before it is bound to a path and embedded.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
}

/// One recognized definition, with its enclosing definition if any.
/// The knowledge graph consumes these; chunking uses the same scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolInfo {
    pub name: String,
    pub line: usize,
    pub parent: Option<String>,
    pub exported: bool,
}

#[derive(Debug, Default)]
pub struct ChunkOutput {
    pub chunks: Vec<RawChunk>,
    pub symbols: Vec<SymbolInfo>,
}

// ---------------------------------------------------------------------------
// Definition patterns
// ---------------------------------------------------------------------------

static RE_TS_JS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?type\s+(\w+)\s*=").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?(?:const\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:export\s+)?const\s+(\w+)\s*=\s*(?:async\s+)?(?:\([^)\n]*\)|\w+)\s*=>")
            .unwrap(),
        // Class-nested methods.
        Regex::new(r"(?m)^\s+(?:(?:public|private|protected|static|async|override)\s+)*(\w+)\s*\([^)\n]*\)\s*(?::\s*[^({\n]+)?\{")
            .unwrap(),
    ]
});

static RE_RUST: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:pub(?:\([\w\s:,]+\))?\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)")
            .unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w\s:,]+\))?\s+)?struct\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w\s:,]+\))?\s+)?enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w\s:,]+\))?\s+)?trait\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:pub(?:\([\w\s:,]+\))?\s+)?type\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^impl(?:<[^>\n]*>)?\s+(\w+)").unwrap(),
    ]
});

static RE_PYTHON: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^class\s+(\w+)").unwrap(),
    ]
});

static RE_GO: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^func\s+(?:\([^)\n]+\)\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^type\s+(\w+)\s+(?:struct|interface)").unwrap(),
    ]
});

static RE_JAVA: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?(?:abstract\s+)?(?:final\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*enum\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s+(?:public|private|protected)\s+(?:static\s+)?(?:final\s+)?(?:synchronized\s+)?[\w<>\[\]]+\s+(\w+)\s*\(").unwrap(),
    ]
});

static RE_C_FAMILY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^(?:static\s+)?(?:inline\s+)?(?:[\w:*&<>]+\s+)+(\w+)\s*\([^;\n]*$").unwrap(),
        Regex::new(r"(?m)^(?:static\s+)?(?:inline\s+)?(?:[\w:*&<>]+\s+)+(\w+)\s*\([^;\n]*\)\s*\{").unwrap(),
        Regex::new(r"(?m)^(?:class|struct)\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^enum\s+(?:class\s+)?(\w+)").unwrap(),
        Regex::new(r"(?m)^namespace\s+(\w+)").unwrap(),
    ]
});

static RE_RUBY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*def\s+(?:self\.)?(\w+[?!]?)").unwrap(),
        Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^\s*module\s+(\w+)").unwrap(),
    ]
});

static RE_PHP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\s*(?:public|private|protected)?\s*(?:static\s+)?function\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^(?:abstract\s+)?class\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^interface\s+(\w+)").unwrap(),
        Regex::new(r"(?m)^trait\s+(\w+)").unwrap(),
    ]
});

/// Captured names that are really control-flow keywords snagged by the
/// method heuristics.
const NON_SYMBOL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "else", "do", "return", "new", "try", "function",
    "match", "loop",
];

fn patterns_for(language: Language) -> Option<&'static [Regex]> {
    match language {
        Language::TypeScript | Language::JavaScript => Some(&RE_TS_JS),
        Language::Rust => Some(&RE_RUST),
        Language::Python => Some(&RE_PYTHON),
        Language::Go => Some(&RE_GO),
        Language::Java => Some(&RE_JAVA),
        Language::CFamily => Some(&RE_C_FAMILY),
        Language::Ruby => Some(&RE_RUBY),
        Language::Php => Some(&RE_PHP),
        Language::Plain => None,
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Definition {
    name: String,
    start: usize, // 0-based line index
    end: usize,   // 0-based, inclusive
    exported: bool,
}

/// Chunk a file. Empty (or whitespace-only) input produces no chunks.
pub fn chunk_file(text: &str, language: Language) -> ChunkOutput {
    if text.trim().is_empty() {
        return ChunkOutput::default();
    }

    let lines: Vec<&str> = text.lines().collect();
    let line_count = lines.len().max(1);

    let definitions = find_definitions(text, &lines, language);
    let symbols = build_symbols(&definitions, language);

    let mut chunks = Vec::new();
    let mut seen_ranges: HashSet<(usize, usize)> = HashSet::new();
    let mut push = |chunks: &mut Vec<RawChunk>, chunk: RawChunk| {
        if seen_ranges.insert((chunk.start_line, chunk.end_line)) {
            chunks.push(chunk);
        }
    };

    // Whole-file chunk first.
    push(
        &mut chunks,
        RawChunk {
            content: text.to_string(),
            start_line: 1,
            end_line: line_count,
            kind: ChunkKind::File,
            symbol: None,
        },
    );

    // Definition chunks. Containers are trimmed to end before their first
    // nested definition so same-kind chunks never overlap; the nested
    // definitions carry their own chunks.
    let mut covered = vec![false; line_count];
    for (i, def) in definitions.iter().enumerate() {
        let mut chunk_end = def.end;
        for nested in definitions.iter().skip(i + 1) {
            if nested.start > def.start && nested.start <= def.end {
                chunk_end = chunk_end.min(nested.start.saturating_sub(1));
                break;
            }
        }
        let chunk_end = chunk_end.max(def.start);
        for flag in covered.iter_mut().take(def.end + 1).skip(def.start) {
            *flag = true;
        }
        push(
            &mut chunks,
            RawChunk {
                content: lines[def.start..=chunk_end].join("\n"),
                start_line: def.start + 1,
                end_line: chunk_end + 1,
                kind: ChunkKind::Definition,
                symbol: Some(def.name.clone()),
            },
        );
    }

    // Block chunks over uncovered regions.
    for (gap_start, gap_end) in uncovered_gaps(&covered, &lines) {
        let mut window_start = gap_start;
        while window_start <= gap_end {
            let window_end = (window_start + BLOCK_CHUNK_LINES - 1).min(gap_end);
            push(
                &mut chunks,
                RawChunk {
                    content: lines[window_start..=window_end].join("\n"),
                    start_line: window_start + 1,
                    end_line: window_end + 1,
                    kind: ChunkKind::Block,
                    symbol: None,
                },
            );
            window_start = window_end + 1;
        }
    }

    ChunkOutput { chunks, symbols }
}

/// Locate definition start lines and compute their extents, sorted by
/// start line. One definition per line; the first matching pattern wins.
fn find_definitions(text: &str, lines: &[&str], language: Language) -> Vec<Definition> {
    let Some(patterns) = patterns_for(language) else {
        return Vec::new();
    };

    let line_offsets = line_start_offsets(text);
    let mut by_line: Vec<Option<String>> = vec![None; lines.len()];

    for re in patterns {
        for cap in re.captures_iter(text) {
            let Some(name) = cap.get(1) else { continue };
            let sym = name.as_str();
            if sym.len() < 2 || NON_SYMBOL_KEYWORDS.contains(&sym) {
                continue;
            }
            let line_idx = offset_to_line(&line_offsets, cap.get(0).map_or(0, |m| m.start()));
            if by_line[line_idx].is_none() {
                by_line[line_idx] = Some(sym.to_string());
            }
        }
    }

    let mut definitions = Vec::new();
    for (idx, name) in by_line.into_iter().enumerate() {
        let Some(name) = name else { continue };
        let end = definition_end(lines, idx, language);
        let line = lines[idx];
        definitions.push(Definition {
            exported: is_exported(line, language, indent_of(line)),
            name,
            start: idx,
            end,
        });
    }
    definitions.sort_by_key(|d| d.start);
    definitions
}

fn build_symbols(definitions: &[Definition], _language: Language) -> Vec<SymbolInfo> {
    definitions
        .iter()
        .map(|def| {
            // Innermost enclosing definition, by extent.
            let parent = definitions
                .iter()
                .filter(|p| p.start < def.start && p.end >= def.end)
                .max_by_key(|p| p.start)
                .map(|p| p.name.clone());
            SymbolInfo {
                name: def.name.clone(),
                line: def.start + 1,
                parent,
                exported: def.exported,
            }
        })
        .collect()
}

/// Compute the inclusive end line (0-based) of a definition starting at
/// `start`. Brace languages walk the brace balance; indentation languages
/// take the maximal more-indented block.
fn definition_end(lines: &[&str], start: usize, language: Language) -> usize {
    let cap = (start + MAX_DEFINITION_LINES - 1).min(lines.len() - 1);

    if language.brace_delimited() {
        let mut depth = 0i32;
        let mut seen_open = false;
        for (idx, line) in lines.iter().enumerate().take(cap + 1).skip(start) {
            for ch in line.chars() {
                match ch {
                    '{' => {
                        depth += 1;
                        seen_open = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if seen_open && depth <= 0 {
                return idx;
            }
            // Single-line forms (`type X = Y;`, `const f = (x) => x * 2;`)
            // end at the first statement terminator before any brace opens.
            if !seen_open && idx >= start && line.trim_end().ends_with(';') {
                return idx;
            }
            if !seen_open && idx >= start + 4 {
                return start;
            }
        }
        return cap;
    }

    // Indentation block: everything more indented than the definition
    // line, allowing interior blank lines. Ruby `end` at the same indent
    // closes the block and belongs to it.
    let base = indent_of(lines[start]);
    let mut end = start;
    let mut idx = start + 1;
    while idx <= cap {
        let line = lines[idx];
        if line.trim().is_empty() {
            idx += 1;
            continue;
        }
        let ind = indent_of(line);
        if ind > base {
            end = idx;
            idx += 1;
            continue;
        }
        if language == Language::Ruby && ind == base && line.trim() == "end" {
            return idx;
        }
        break;
    }
    end
}

/// Gaps of definition-uncovered lines, trimmed of blank edges.
/// Returns 0-based inclusive ranges.
fn uncovered_gaps(covered: &[bool], lines: &[&str]) -> Vec<(usize, usize)> {
    let mut gaps = Vec::new();
    let mut idx = 0;
    while idx < covered.len() {
        if covered[idx] {
            idx += 1;
            continue;
        }
        let gap_start = idx;
        while idx < covered.len() && !covered[idx] {
            idx += 1;
        }
        let mut start = gap_start;
        let mut end = idx - 1;
        while start <= end && lines[start].trim().is_empty() {
            start += 1;
        }
        while end > start && lines[end].trim().is_empty() {
            end -= 1;
        }
        if start <= end && lines[start..=end].iter().any(|l| !l.trim().is_empty()) {
            gaps.push((start, end));
        }
    }
    gaps
}

fn is_exported(line: &str, language: Language, indent: usize) -> bool {
    let trimmed = line.trim_start();
    match language {
        Language::TypeScript | Language::JavaScript => trimmed.starts_with("export "),
        Language::Rust => trimmed.starts_with("pub ") || trimmed.starts_with("pub("),
        Language::Go => trimmed
            .split_whitespace()
            .nth(1)
            .and_then(|name| name.chars().next())
            .is_some_and(|c| c.is_uppercase()),
        // Indentation languages: top-level definitions are the public
        // surface as far as the graph is concerned.
        _ => indent == 0,
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn line_start_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (i, b) in text.bytes().enumerate() {
        if b == b'\n' {
            offsets.push(i + 1);
        }
    }
    offsets
}

fn offset_to_line(offsets: &[usize], offset: usize) -> usize {
    match offsets.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS_SAMPLE: &str = r#"import { helper } from './helper';

export function foo(x: number): number {
    return x * 2;
}

export class Widget {
    count = 0;

    increment(): void {
        this.count += 1;
    }
}
"#;

    #[test]
    fn emits_file_definition_and_block_chunks() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        let kinds: Vec<ChunkKind> = out.chunks.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ChunkKind::File));
        assert!(kinds.contains(&ChunkKind::Definition));
        // The import line is covered by no definition, so a block exists.
        assert!(kinds.contains(&ChunkKind::Block));

        let names: Vec<&str> = out
            .chunks
            .iter()
            .filter_map(|c| c.symbol.as_deref())
            .collect();
        assert!(names.contains(&"foo"));
        assert!(names.contains(&"Widget"));
        assert!(names.contains(&"increment"));
    }

    #[test]
    fn file_chunk_spans_whole_file() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        let file = out
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::File)
            .unwrap();
        assert_eq!(file.start_line, 1);
        assert_eq!(file.end_line, TS_SAMPLE.lines().count());
        assert_eq!(file.content, TS_SAMPLE);
    }

    #[test]
    fn method_parent_is_recorded() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        let increment = out.symbols.iter().find(|s| s.name == "increment").unwrap();
        assert_eq!(increment.parent.as_deref(), Some("Widget"));
        let widget = out.symbols.iter().find(|s| s.name == "Widget").unwrap();
        assert_eq!(widget.parent, None);
        assert!(widget.exported);
    }

    #[test]
    fn definition_ranges_are_one_based_and_ordered() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        for c in &out.chunks {
            assert!(c.start_line >= 1);
            assert!(c.start_line <= c.end_line);
        }
        let foo = out
            .chunks
            .iter()
            .find(|c| c.symbol.as_deref() == Some("foo"))
            .unwrap();
        assert_eq!(foo.start_line, 3);
        assert_eq!(foo.end_line, 5);
    }

    #[test]
    fn same_kind_chunks_do_not_overlap() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        let defs: Vec<&RawChunk> = out
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Definition)
            .collect();
        for (i, a) in defs.iter().enumerate() {
            for b in defs.iter().skip(i + 1) {
                assert!(
                    a.end_line < b.start_line || b.end_line < a.start_line,
                    "overlap between {:?} and {:?}",
                    a.symbol,
                    b.symbol
                );
            }
        }
    }

    #[test]
    fn python_indentation_blocks() {
        let src = "def alpha():\n    a = 1\n    return a\n\n\ndef beta():\n    return 2\n";
        let out = chunk_file(src, Language::Python);
        let alpha = out
            .chunks
            .iter()
            .find(|c| c.symbol.as_deref() == Some("alpha"))
            .unwrap();
        assert_eq!((alpha.start_line, alpha.end_line), (1, 3));
        let beta = out
            .chunks
            .iter()
            .find(|c| c.symbol.as_deref() == Some("beta"))
            .unwrap();
        assert_eq!((beta.start_line, beta.end_line), (6, 7));
    }

    #[test]
    fn rust_functions_recognized() {
        let src = "pub fn run(x: u32) -> u32 {\n    x + 1\n}\n\nstruct Config {\n    value: u32,\n}\n";
        let out = chunk_file(src, Language::Rust);
        let names: Vec<&str> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"run"));
        assert!(names.contains(&"Config"));
        assert!(out.symbols.iter().find(|s| s.name == "run").unwrap().exported);
    }

    #[test]
    fn no_definitions_falls_back_to_blocks() {
        let src = (1..=120)
            .map(|i| format!("line number {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let out = chunk_file(&src, Language::Plain);
        let blocks: Vec<&RawChunk> = out
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Block)
            .collect();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.end_line - b.start_line + 1 <= BLOCK_CHUNK_LINES));
        assert_eq!(blocks[0].start_line, 1);
        assert_eq!(blocks[0].end_line, 50);
        assert_eq!(blocks[2].end_line, 120);
    }

    #[test]
    fn empty_file_produces_no_chunks() {
        assert!(chunk_file("", Language::TypeScript).chunks.is_empty());
        assert!(chunk_file("   \n\n", Language::TypeScript).chunks.is_empty());
    }

    #[test]
    fn deterministic() {
        let a = chunk_file(TS_SAMPLE, Language::TypeScript);
        let b = chunk_file(TS_SAMPLE, Language::TypeScript);
        assert_eq!(a.chunks, b.chunks);
        assert_eq!(a.symbols, b.symbols);
    }

    #[test]
    fn ranges_are_unique() {
        let out = chunk_file(TS_SAMPLE, Language::TypeScript);
        let mut seen = std::collections::HashSet::new();
        for c in &out.chunks {
            assert!(seen.insert((c.start_line, c.end_line)), "duplicate range");
        }
    }
}
