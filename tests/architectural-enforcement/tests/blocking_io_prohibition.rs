//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async production code in the conductor MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::process` and async
//! `reqwest`, not `std::fs`, `std::net`, `std::process` or `reqwest::blocking`.
//! **Acceptable**: blocking calls in non-async functions (configuration
//! loading before the runtime serves requests) and test code.

use architectural_enforcement::{
    core_src_dir, is_in_async_function, rust_files, scan_file, Violation,
};

const FORBIDDEN_IN_ASYNC: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin()", "Blocking stdin"),
];

const FORBIDDEN_ANYWHERE: &[(&str, &str)] = &[("reqwest::blocking", "Blocking HTTP client")];

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations: Vec<Violation> = rust_files(&core_src_dir())
        .iter()
        .flat_map(|path| {
            scan_file(path, |lines, idx, code| {
                FORBIDDEN_IN_ASYNC
                    .iter()
                    .any(|(pattern, _)| code.contains(pattern))
                    && is_in_async_function(lines, idx)
            })
        })
        .collect();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        for (pattern, what) in FORBIDDEN_IN_ASYNC {
            eprintln!("  forbidden in async: {pattern} ({what})");
        }
        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_no_blocking_http_client() {
    let violations: Vec<Violation> = rust_files(&core_src_dir())
        .iter()
        .flat_map(|path| {
            scan_file(path, |_, _, code| {
                FORBIDDEN_ANYWHERE
                    .iter()
                    .any(|(pattern, _)| code.contains(pattern))
            })
        })
        .collect();

    assert!(
        violations.is_empty(),
        "Blocking HTTP client in production code:\n{}",
        violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}

#[test]
fn test_scanner_finds_production_files() {
    let files = rust_files(&core_src_dir());
    assert!(files.iter().any(|p| p.ends_with("invocation.rs")));
    assert!(files.len() > 10);
}
