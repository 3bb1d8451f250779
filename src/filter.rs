//! Path filter: decides whether a workspace path is indexable.
//!
//! Rules are applied in order: excluded directories (and configured
//! ignore patterns), secret-path deny-list, extension / special-file
//! allow-list, size cap. The filter is purely functional; callers pass
//! the file size rather than having the filter stat anything.

use std::path::{Component, Path};
use std::sync::LazyLock;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::{self, EngineConfig};

/// Basenames that look like credential files. `env.example` and
/// `env.template` style files are explicitly allowed below.
static SECRET_PATTERNS: LazyLock<GlobSet> = LazyLock::new(|| {
    let mut builder = GlobSetBuilder::new();
    for pattern in [
        ".env",
        "*.env",
        ".env.*",
        "*.env.local",
        "*.pem",
        "*.key",
        "id_rsa",
        "id_ed25519",
        "credentials.json",
        ".npmrc",
        ".netrc",
    ] {
        builder.add(Glob::new(pattern).expect("static glob"));
    }
    builder.build().expect("static globset")
});

/// Basenames excepted from the secret deny-list: templates are
/// documentation, not credentials.
const SECRET_EXCEPTIONS: &[&str] = &[
    "env.example",
    "env.template",
    "env.sample",
    ".env.example",
    ".env.template",
    ".env.sample",
];

pub struct PathFilter {
    max_file_size: u64,
    ignored: GlobSet,
}

impl PathFilter {
    pub fn new(config: &EngineConfig) -> Self {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignored {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid ignore pattern");
                }
            }
        }
        Self {
            max_file_size: config.max_file_size,
            ignored: builder.build().unwrap_or_else(|_| GlobSet::empty()),
        }
    }

    /// Full indexability check for a file of known size.
    pub fn is_indexable(&self, path: &Path, size: u64) -> bool {
        self.is_candidate(path) && size <= self.max_file_size
    }

    /// Everything except the size cap. The watcher uses this for removal
    /// events, where the file no longer exists to be measured.
    pub fn is_candidate(&self, path: &Path) -> bool {
        if self.in_excluded_directory(path) {
            return false;
        }

        let basename = match path.file_name() {
            Some(name) => name.to_string_lossy().to_lowercase(),
            None => return false,
        };

        if is_secret_basename(&basename) {
            return false;
        }

        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        config::is_supported_extension(&ext) || config::SPECIAL_FILES.contains(&basename.as_str())
    }

    fn in_excluded_directory(&self, path: &Path) -> bool {
        for component in path.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if config::is_excluded_directory(name.as_ref()) {
                    return true;
                }
                if !self.ignored.is_empty() && self.ignored.is_match(name.as_ref()) {
                    return true;
                }
            }
        }
        false
    }
}

fn is_secret_basename(basename: &str) -> bool {
    if SECRET_EXCEPTIONS.contains(&basename) {
        return false;
    }
    SECRET_PATTERNS.is_match(basename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn filter() -> PathFilter {
        PathFilter::new(&EngineConfig::new("/tmp/ws"))
    }

    #[test]
    fn accepts_source_files() {
        let f = filter();
        assert!(f.is_indexable(Path::new("/ws/src/main.rs"), 100));
        assert!(f.is_indexable(Path::new("/ws/src/app.tsx"), 100));
        assert!(f.is_indexable(Path::new("/ws/Dockerfile"), 100));
        assert!(f.is_indexable(Path::new("/ws/Makefile"), 100));
    }

    #[test]
    fn rejects_excluded_directories() {
        let f = filter();
        assert!(!f.is_indexable(Path::new("/ws/node_modules/x/index.js"), 100));
        assert!(!f.is_indexable(Path::new("/ws/.git/config"), 100));
        assert!(!f.is_indexable(Path::new("/ws/.loupe-context/vectors.db"), 100));
        assert!(!f.is_indexable(Path::new("/ws/dist/bundle.js"), 100));
    }

    #[test]
    fn rejects_secret_files_but_allows_templates() {
        let f = filter();
        assert!(!f.is_candidate(Path::new("/ws/.env")));
        assert!(!f.is_candidate(Path::new("/ws/.env.local")));
        assert!(!f.is_candidate(Path::new("/ws/prod.env")));
        assert!(!f.is_candidate(Path::new("/ws/server.pem")));
        assert!(f.is_candidate(Path::new("/ws/.env.example")));
        assert!(f.is_candidate(Path::new("/ws/env.template")));
    }

    #[test]
    fn rejects_unknown_extensions() {
        let f = filter();
        assert!(!f.is_indexable(Path::new("/ws/image.png"), 100));
        assert!(!f.is_indexable(Path::new("/ws/binary.exe"), 100));
    }

    #[test]
    fn size_cap_is_inclusive() {
        let f = filter();
        let p = Path::new("/ws/big.ts");
        assert!(f.is_indexable(p, 500_000));
        assert!(!f.is_indexable(p, 500_001));
    }

    #[test]
    fn user_ignore_patterns_apply() {
        let mut cfg = EngineConfig::new("/tmp/ws");
        cfg.ignored = vec!["generated".into()];
        let f = PathFilter::new(&cfg);
        assert!(!f.is_indexable(Path::new("/ws/generated/api.ts"), 100));
        assert!(f.is_indexable(Path::new("/ws/src/api.ts"), 100));
    }
}
