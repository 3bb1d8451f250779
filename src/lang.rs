//! Language detection from file extensions.
//!
//! The chunker picks its definition-pattern table from the detected
//! language and the knowledge graph uses the same hint for import parsing,
//! so both subsystems agree on what a file is.

use std::path::Path;

/// Language families the pattern-based parser distinguishes. Anything
/// else falls back to `Plain`, which still gets file-level and block
/// chunks but no definition recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    JavaScript,
    Rust,
    Python,
    Go,
    Java,
    CFamily,
    Ruby,
    Php,
    Plain,
}

impl Language {
    /// Detect the language for a path from its extension (or basename
    /// for extensionless special files).
    pub fn detect(path: &Path) -> Language {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "ts" | "tsx" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" | "vue" | "svelte" | "astro" => Language::JavaScript,
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "java" | "kt" | "kts" | "scala" => Language::Java,
            "c" | "h" | "cpp" | "hpp" | "cc" | "cxx" | "hxx" | "cs" => Language::CFamily,
            "rb" | "rake" => Language::Ruby,
            "php" => Language::Php,
            _ => Language::Plain,
        }
    }

    /// Whether definitions in this language are delimited by braces.
    /// Python and Ruby use indentation / `end` blocks instead.
    pub fn brace_delimited(self) -> bool {
        !matches!(self, Language::Python | Language::Ruby | Language::Plain)
    }

    /// Stable identifier used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Rust => "rust",
            Language::Python => "python",
            Language::Go => "go",
            Language::Java => "java",
            Language::CFamily => "c",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Plain => "plaintext",
        }
    }
}

/// Extensions tried when resolving a relative import source to a file,
/// in priority order.
pub const IMPORT_RESOLUTION_EXTENSIONS: &[&str] =
    &["ts", "tsx", "js", "jsx", "mjs", "py", "rs", "go"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension() {
        assert_eq!(Language::detect(Path::new("a/b.ts")), Language::TypeScript);
        assert_eq!(Language::detect(Path::new("x.rs")), Language::Rust);
        assert_eq!(Language::detect(Path::new("x.unknown")), Language::Plain);
        assert_eq!(Language::detect(Path::new("Makefile")), Language::Plain);
    }

    #[test]
    fn brace_delimiting() {
        assert!(Language::TypeScript.brace_delimited());
        assert!(!Language::Python.brace_delimited());
    }
}
