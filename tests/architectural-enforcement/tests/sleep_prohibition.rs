//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the conductor MUST NOT block a worker
//! thread, and may only suspend on an explicit delay where the delay is the
//! behaviour being implemented.
//! **Exceptions**: retry backoff in the invocation primitive, simulated
//! latency in the mock provider, test code.

use architectural_enforcement::{core_src_dir, rust_files, scan_file, Violation};

/// Files whose async sleeps implement a required delay
const SLEEP_ALLOWED: &[&str] = &["invocation.rs", "backend/mock.rs"];

fn is_allowed(path: &std::path::Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    SLEEP_ALLOWED.iter().any(|allowed| normalized.ends_with(allowed))
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations: Vec<Violation> = rust_files(&core_src_dir())
        .iter()
        .flat_map(|path| {
            scan_file(path, |_, _, code| {
                code.contains("thread::sleep(") || code.contains("std::thread::sleep")
            })
        })
        .collect();

    if !violations.is_empty() {
        eprintln!("\nThread-blocking sleep found in production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::time::sleep or wait on the I/O itself.");
        panic!("Found {} thread sleep violation(s)", violations.len());
    }
}

#[test]
fn test_async_sleep_only_where_delay_is_required() {
    let violations: Vec<Violation> = rust_files(&core_src_dir())
        .iter()
        .filter(|path| !is_allowed(path))
        .flat_map(|path| {
            scan_file(path, |_, _, code| {
                code.contains("::sleep(") || code.contains(".sleep(")
            })
        })
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found outside the allowed delay sites:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nACCEPTABLE: retry backoff (invocation.rs), mock latency (backend/mock.rs)");
        eprintln!("FORBIDDEN: polling loops, sleep as synchronization");
        panic!("Found {} sleep violation(s)", violations.len());
    }
}

#[test]
fn test_allowed_sites_still_exist() {
    // A renamed file would silently widen the allowlist's meaning
    for allowed in SLEEP_ALLOWED {
        assert!(
            core_src_dir().join(allowed).exists(),
            "allowlisted file {allowed} is missing"
        );
    }
}
