//! Per-session cache of source lines and normalized paths.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Paths that name code with no backing file.
pub const PSEUDO_PATHS: [&str; 2] = ["(eval)", "(irb)"];

pub fn is_pseudo_path(path: &str) -> bool {
    PSEUDO_PATHS.contains(&path)
}

#[derive(Default)]
pub struct SourceCache {
    lines: HashMap<String, Option<Vec<String>>>,
    real_paths: HashMap<String, String>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the cache with in-memory text for `path`.
    pub fn insert(&mut self, path: &str, text: &str) {
        self.lines
            .insert(path.to_string(), Some(text.lines().map(str::to_string).collect()));
    }

    /// Canonical form of `path`: the real path when it resolves, otherwise as given.
    pub fn normalize(&mut self, path: &str) -> String {
        if path.is_empty() || is_pseudo_path(path) {
            return path.to_string();
        }
        if let Some(real) = self.real_paths.get(path) {
            return real.clone();
        }
        let real = fs::canonicalize(Path::new(path))
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string());
        self.real_paths.insert(path.to_string(), real.clone());
        real
    }

    /// Text of 1-based `lineno` in `path`, if the file can be read.
    pub fn line(&mut self, path: &str, lineno: u32) -> Option<&str> {
        if is_pseudo_path(path) || lineno == 0 {
            return None;
        }
        let lines = self.lines.entry(path.to_string()).or_insert_with(|| {
            match fs::read_to_string(path) {
                Ok(text) => Some(text.lines().map(str::to_string).collect()),
                Err(err) => {
                    debug!(path, %err, "source unavailable for line capture");
                    None
                }
            }
        });
        lines
            .as_ref()
            .and_then(|lines| lines.get(lineno as usize - 1))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_line_reads_and_caches_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "let a = 1;\nlet b = a + 1;").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut cache = SourceCache::new();
        assert_eq!(cache.line(&path, 2), Some("let b = a + 1;"));
        assert_eq!(cache.line(&path, 3), None);
        assert_eq!(cache.line(&path, 0), None);
    }

    #[test]
    fn test_pseudo_paths_have_no_lines() {
        let mut cache = SourceCache::new();
        cache.insert("(eval)", "x");
        assert_eq!(cache.line("(eval)", 1), None);
        assert_eq!(cache.normalize("(irb)"), "(irb)");
    }

    #[test]
    fn test_normalize_falls_back_to_given_path() {
        let mut cache = SourceCache::new();
        assert_eq!(cache.normalize("/no/such/file.rs"), "/no/such/file.rs");
        assert_eq!(cache.normalize(""), "");
    }

    #[test]
    fn test_inserted_text_serves_lines() {
        let mut cache = SourceCache::new();
        cache.insert("virtual.rs", "fn f() {\n    g(x)\n}");
        assert_eq!(cache.line("virtual.rs", 2), Some("    g(x)"));
    }
}
