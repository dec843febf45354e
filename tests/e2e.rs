//! End-to-end integration tests for edgequake-invoice.
//!
//! These tests use real invoice PDFs in `./test_cases/` and make live API
//! calls. They are gated behind the `E2E_ENABLED` environment variable so
//! they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 GEMINI_API_KEY=... cargo test --test e2e -- --nocapture
//!
//! Use another file with `E2E_INVOICE=/path/to/invoice.pdf`.

use edgequake_invoice::{
    extract, extract_to_file, inspect, ErrorKind, ExtractionConfig, DOWNLOAD_FILE_NAME,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn invoice_pdf() -> PathBuf {
    std::env::var("E2E_INVOICE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/invoice.pdf")
        })
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

// ── Inspect ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_invoice() {
    let path = e2e_skip_unless_ready!(invoice_pdf());
    let meta = inspect(path.to_string_lossy(), &ExtractionConfig::default())
        .await
        .expect("inspect should succeed");
    println!("{meta:?}");
    assert!(meta.page_count >= 1);
}

#[tokio::test]
async fn test_inspect_nonexistent() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let err = inspect("/tmp/does-not-exist-invoice.pdf", &ExtractionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_extract_first_page() {
    let path = e2e_skip_unless_ready!(invoice_pdf());
    let output = extract(path.to_string_lossy(), &ExtractionConfig::default())
        .await
        .expect("extraction should succeed");

    println!("{}", output.to_pretty_json().unwrap());
    for w in &output.warnings {
        println!("warning: {w}");
    }

    let record = output.record().expect("record has the schema shape");
    assert!(
        record.invoice_details.invoice_number.is_some(),
        "an invoice number should be readable"
    );
    for item in &record.item_details {
        if let Some(q) = item.item_quantity {
            assert!(q >= 0.0);
        }
    }
    assert_eq!(output.stats.pages_sent, 1);
    assert!(output.stats.total_input_tokens > 0);
}

#[tokio::test]
async fn test_extract_to_file_writes_artifact() {
    let path = e2e_skip_unless_ready!(invoice_pdf());
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join(DOWNLOAD_FILE_NAME);

    let output = extract_to_file(path.to_string_lossy(), &target, &ExtractionConfig::default())
        .await
        .expect("extraction should succeed");

    let text = std::fs::read_to_string(&target).unwrap();
    assert_eq!(text, output.to_pretty_json().unwrap());
}

#[tokio::test]
async fn test_bad_api_key_is_not_retried() {
    let path = e2e_skip_unless_ready!(invoice_pdf());
    let config = ExtractionConfig::builder()
        .provider_name("gemini")
        .api_key("invalid-key-for-e2e")
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let err = extract(path.to_string_lossy(), &config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inference);
    // No backoff sleeps for a permanent failure.
    assert!(started.elapsed().as_secs() < 30);
}

// ── Callback thread-safety ───────────────────────────────────────────────────

#[test]
fn test_noop_callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<edgequake_invoice::NoopProgressCallback>();
    assert_send_sync::<ExtractionConfig>();
}
