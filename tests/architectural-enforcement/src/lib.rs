//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the conductor's production code:
//! - No thread-blocking sleep, and async sleep only where a delay is the point
//! - No blocking I/O inside async functions
//!
//! The helpers here do line-level scanning. Everything from a file's first
//! `#[cfg(test)]` onwards is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// One production line that broke a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the line is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// `conductor/core/src`, resolved from this package's manifest directory
#[must_use]
pub fn core_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("conductor")
        .join("core")
        .join("src")
}

/// Every `.rs` file under `dir`
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Code lines before the test module, with comments stripped
///
/// Returns `(index, code)` pairs; `index` is 0-based.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        out.push((idx, code.to_string()));
    }
    out
}

/// Whether a trimmed line opens a function
fn is_fn_signature(line: &str) -> bool {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
        }
    }
    for prefix in ["const ", "async ", "unsafe "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
        }
    }
    rest.starts_with("fn ")
}

/// Whether line `idx` sits inside an `async fn`
///
/// Scans backwards to the nearest function signature.
#[must_use]
pub fn is_in_async_function(lines: &[&str], idx: usize) -> bool {
    for i in (0..=idx.min(lines.len().saturating_sub(1))).rev() {
        let line = lines[i].trim();
        if is_fn_signature(line) {
            return line.contains("async fn ");
        }
        // Async blocks count too
        if line.contains("async move {") || line.ends_with("async {") {
            return true;
        }
        if line.starts_with("mod ") || (line.starts_with("impl") && line.contains('{')) {
            return false;
        }
    }
    false
}

/// Scan a file's production code for lines matching `rule`
pub fn scan_file<F>(path: &Path, mut rule: F) -> Vec<Violation>
where
    F: FnMut(&[&str], usize, &str) -> bool,
{
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let all: Vec<&str> = content.lines().collect();

    production_lines(&content)
        .into_iter()
        .filter(|(idx, code)| rule(&all, *idx, code))
        .map(|(idx, _)| Violation {
            path: path.to_path_buf(),
            line: idx + 1,
            text: all[idx].trim().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let code = "fn a() {}\n// comment\nfn b() {} // trailing\n#[cfg(test)]\nfn c() {}\n";
        let lines = production_lines(code);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].0, 0);
        assert_eq!(lines[1], (2, "fn b() {} ".to_string()));
    }

    #[test]
    fn test_async_function_detection() {
        let code = vec![
            "pub async fn invoke(&self) {",
            "    let x = std::fs::read_to_string(\"f\");",
            "}",
            "pub fn load() {",
            "    let y = std::fs::read_to_string(\"g\");",
            "}",
        ];
        assert!(is_in_async_function(&code, 1));
        assert!(!is_in_async_function(&code, 4));
    }

    #[test]
    fn test_async_block_detection() {
        let code = vec![
            "fn spawn_it() {",
            "    tokio::spawn(async move {",
            "        std::fs::remove_file(\"x\");",
            "    });",
            "}",
        ];
        assert!(is_in_async_function(&code, 2));
    }

    #[test]
    fn test_core_src_dir_exists() {
        assert!(core_src_dir().join("lib.rs").exists());
    }
}
