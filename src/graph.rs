//! Knowledge graph: per-file imports, exports and call-site counts.
//!
//! Nodes are keyed by workspace-relative path and built from the same
//! pattern scan the chunker runs, so both subsystems agree on symbols.
//! Edges are derived on demand by resolving each relative import source
//! against the node index; imports of external packages simply never
//! resolve and drop out.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;

use crate::chunker::SymbolInfo;
use crate::lang::{IMPORT_RESOLUTION_EXTENSIONS, Language};

static RE_JS_IMPORT_NAMED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+(?:type\s+)?\{([^}]*)\}\s*from\s*['"]([^'"]+)['"]"#).unwrap()
});
static RE_JS_IMPORT_DEFAULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+(\w+)\s*from\s*['"]([^'"]+)['"]"#).unwrap()
});
static RE_JS_IMPORT_STAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+\*\s+as\s+(\w+)\s*from\s*['"]([^'"]+)['"]"#).unwrap()
});
static RE_JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:const|let|var)\s+\{?\s*([\w\s,]+?)\s*\}?\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
        .unwrap()
});
static RE_PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^from\s+([\w.]+)\s+import\s+([\w*][\w,\s*]*)").unwrap()
});
static RE_PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^import\s+([\w.]+)").unwrap());
static RE_CALL_SITE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\w+)\s*\(").unwrap());

/// One file's view of its surroundings.
#[derive(Debug, Clone, Default)]
pub struct FileNode {
    pub exports: HashSet<String>,
    /// imported symbol → import source string, as written.
    pub imports: HashMap<String, String>,
    /// symbol → observed call-site count within this file.
    pub call_counts: HashMap<String, usize>,
}

/// An outgoing dependency edge: the resolved target path and the symbols
/// imported from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyEdge {
    pub to: String,
    pub symbols: Vec<String>,
}

#[derive(Default)]
pub struct KnowledgeGraph {
    nodes: DashMap<String, FileNode>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Record (or replace) a file's node from its text and the symbol
    /// scan the chunker already produced for it.
    pub fn update_file(&self, path: &str, text: &str, language: Language, symbols: &[SymbolInfo]) {
        let mut node = FileNode {
            exports: symbols
                .iter()
                .filter(|s| s.exported)
                .map(|s| s.name.clone())
                .collect(),
            imports: parse_imports(text, language),
            call_counts: HashMap::new(),
        };

        // One pass over call-looking sites, filtered to symbols this file
        // imports or exports.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for cap in RE_CALL_SITE.captures_iter(text) {
            if let Some(name) = cap.get(1) {
                *counts.entry(name.as_str()).or_default() += 1;
            }
        }
        for (name, count) in counts {
            if node.imports.contains_key(name) || node.exports.contains(name) {
                node.call_counts.insert(name.to_string(), count);
            }
        }

        self.nodes.insert(path.to_string(), node);
    }

    pub fn remove_file(&self, path: &str) {
        self.nodes.remove(path);
    }

    pub fn clear(&self) {
        self.nodes.clear();
    }

    /// Outgoing edges: each distinct import source that resolves to a
    /// known node, with the symbols imported from it.
    pub fn dependencies(&self, path: &str) -> Vec<DependencyEdge> {
        let Some(node) = self.nodes.get(path) else {
            return Vec::new();
        };

        let mut by_target: HashMap<String, Vec<String>> = HashMap::new();
        for (symbol, source) in &node.imports {
            if let Some(target) = self.resolve_source(path, source) {
                if target != path {
                    by_target.entry(target).or_default().push(symbol.clone());
                }
            }
        }
        drop(node);

        let mut edges: Vec<DependencyEdge> = by_target
            .into_iter()
            .map(|(to, mut symbols)| {
                symbols.sort();
                DependencyEdge { to, symbols }
            })
            .collect();
        edges.sort_by(|a, b| a.to.cmp(&b.to));
        edges
    }

    /// Files whose dependencies include `path`, by scan.
    pub fn dependents(&self, path: &str) -> Vec<String> {
        let mut result: Vec<String> = self
            .nodes
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|candidate| {
                candidate != path
                    && self
                        .dependencies(candidate)
                        .iter()
                        .any(|edge| edge.to == path)
            })
            .collect();
        result.sort();
        result
    }

    /// BFS over dependencies ∪ dependents up to `max_depth` hops; depth
    /// counts hops regardless of edge direction. The seed is excluded.
    pub fn related(&self, path: &str, max_depth: usize) -> HashSet<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((path.to_string(), 0));
        seen.insert(path.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut neighbors: Vec<String> = self
                .dependencies(&current)
                .into_iter()
                .map(|edge| edge.to)
                .collect();
            neighbors.extend(self.dependents(&current));
            for neighbor in neighbors {
                if seen.insert(neighbor.clone()) {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        seen.remove(path);
        seen
    }

    /// Per-file call counts for `name`, highest first.
    pub fn symbol_usage(&self, name: &str) -> Vec<(String, usize)> {
        let mut usage: Vec<(String, usize)> = self
            .nodes
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .call_counts
                    .get(name)
                    .map(|&count| (entry.key().clone(), count))
            })
            .collect();
        usage.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        usage
    }

    /// Resolve an import source written in `from_path` to a known node.
    fn resolve_source(&self, from_path: &str, source: &str) -> Option<String> {
        if source.starts_with("./") || source.starts_with("../") {
            let base = parent_dir(from_path);
            let joined = normalize_relative(&format!("{base}/{source}"))?;
            return self.probe_candidates(&joined);
        }

        // Python-style relative (".helper", "..pkg.mod") and bare module
        // imports resolve against the importing file's package and the
        // workspace root respectively.
        if let Some(stripped) = source.strip_prefix('.') {
            let ups = stripped.chars().take_while(|&c| c == '.').count();
            let rest = &stripped[ups..];
            let mut base = parent_dir(from_path);
            for _ in 0..ups {
                base = parent_dir(&base);
            }
            let rel = rest.replace('.', "/");
            let joined = if base.is_empty() {
                rel
            } else {
                format!("{base}/{rel}")
            };
            return self.probe_candidates(joined.trim_end_matches('/'));
        }

        // Bare module names ("utils", "pkg.mod") are probed from the
        // workspace root; unresolved ones are external packages.
        if !source.contains('/') {
            let rel = source.replace('.', "/");
            return self.probe_candidates(&rel);
        }

        None
    }

    /// Try the base path with each source extension, then as an index
    /// module. Only known nodes count.
    fn probe_candidates(&self, base: &str) -> Option<String> {
        if base.is_empty() {
            return None;
        }
        if self.nodes.contains_key(base) {
            return Some(base.to_string());
        }
        for ext in IMPORT_RESOLUTION_EXTENSIONS {
            let candidate = format!("{base}.{ext}");
            if self.nodes.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        for ext in IMPORT_RESOLUTION_EXTENSIONS {
            let candidate = format!("{base}/index.{ext}");
            if self.nodes.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn parse_imports(text: &str, language: Language) -> HashMap<String, String> {
    let mut imports = HashMap::new();
    match language {
        Language::TypeScript | Language::JavaScript => {
            for cap in RE_JS_IMPORT_NAMED.captures_iter(text) {
                let source = cap[2].to_string();
                for part in cap[1].split(',') {
                    // `a as b` binds the local alias.
                    let name = part.split_whitespace().last().unwrap_or("").trim();
                    if !name.is_empty() {
                        imports.insert(name.to_string(), source.clone());
                    }
                }
            }
            for cap in RE_JS_IMPORT_DEFAULT.captures_iter(text) {
                imports.insert(cap[1].to_string(), cap[2].to_string());
            }
            for cap in RE_JS_IMPORT_STAR.captures_iter(text) {
                imports.insert(cap[1].to_string(), cap[2].to_string());
            }
            for cap in RE_JS_REQUIRE.captures_iter(text) {
                let source = cap[2].to_string();
                for part in cap[1].split(',') {
                    let name = part.split_whitespace().last().unwrap_or("").trim();
                    if !name.is_empty() {
                        imports.insert(name.to_string(), source.clone());
                    }
                }
            }
        }
        Language::Python => {
            for cap in RE_PY_FROM_IMPORT.captures_iter(text) {
                let source = cap[1].to_string();
                for part in cap[2].split(',') {
                    let name = part.split_whitespace().next().unwrap_or("").trim();
                    if !name.is_empty() && name != "*" {
                        imports.insert(name.to_string(), source.clone());
                    }
                }
            }
            for cap in RE_PY_IMPORT.captures_iter(text) {
                let module = cap[1].to_string();
                let local = module.rsplit('.').next().unwrap_or(&module).to_string();
                imports.insert(local, module);
            }
        }
        _ => {}
    }
    imports
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Collapse `.` and `..` components of a forward-slashed relative path.
/// Returns `None` when the path escapes the workspace root.
fn normalize_relative(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}
