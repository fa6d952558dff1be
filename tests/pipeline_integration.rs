use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn evx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("evx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Stub provider: deterministic vectors, no network.
    let config_content = format!(
        r#"[db]
path = "{}/data/evx.sqlite"

[embedding]
provider = "stub"
dims = 16

[pipeline]
backfill_batch_size = 10
search_limit = 12
"#,
        root.display()
    );

    let config_path = config_dir.join("evx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn write_event_file(dir: &Path) -> PathBuf {
    let path = dir.join("event.json");
    fs::write(
        &path,
        r#"{
            "eventId": "evt_single",
            "userId": "u_1",
            "eventType": "finance.transaction_created",
            "timestampMs": 1700000000000,
            "payload": {
                "amount": 42.5,
                "currency": "USD",
                "merchant": "Coffee Shop",
                "merchantId": "m_1",
                "category": "food_and_drink"
            }
        }"#,
    )
    .unwrap();
    path
}

fn write_events_jsonl(dir: &Path, count: usize) -> PathBuf {
    let path = dir.join("events.jsonl");
    let mut lines = String::new();
    for i in 0..count {
        lines.push_str(&format!(
            "{{\"eventId\": \"evt_{:03}\", \"userId\": \"u_1\", \
             \"eventType\": \"browser.visit\", \"timestampMs\": {}, \
             \"payload\": {{\"title\": \"Rust async book chapter {}\", \
             \"url\": \"https://example.com/{}\"}}}}\n",
            i,
            1_700_000_000_000i64 + i as i64,
            i,
            i
        ));
    }
    fs::write(&path, lines).unwrap();
    path
}

fn run_evx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = evx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run evx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_evx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_evx(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_evx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_vectorize_single_event() {
    let (tmp, config_path) = setup_test_env();
    let event_path = write_event_file(tmp.path());

    run_evx(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_evx(&config_path, &["vectorize", event_path.to_str().unwrap()]);
    assert!(
        success,
        "vectorize failed: stdout={}, stderr={}",
        stdout, stderr
    );
    // Content + entity views for a finance event with a merchant ref.
    assert!(stdout.contains("Vectorized evt_single"));
    assert!(stdout.contains("2 rows written"));
}

#[test]
fn test_vectorize_twice_is_skip() {
    let (tmp, config_path) = setup_test_env();
    let event_path = write_event_file(tmp.path());

    run_evx(&config_path, &["init"]);
    let (_, _, success1) = run_evx(&config_path, &["vectorize", event_path.to_str().unwrap()]);
    assert!(success1);

    let (stdout, _, success2) =
        run_evx(&config_path, &["vectorize", event_path.to_str().unwrap()]);
    assert!(success2, "Re-vectorize should succeed as a skip");
    assert!(stdout.contains("Skipped evt_single"));
    assert!(stdout.contains("already-vectorized"));
}

#[test]
fn test_backfill_processes_all_events() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 25);

    run_evx(&config_path, &["init"]);
    let (stdout, stderr, success) =
        run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);
    assert!(
        success,
        "backfill failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("25 matched"));
    assert!(stdout.contains("25 ok"));
    assert!(stdout.contains("0 failed"));

    let (coverage, _, _) = run_evx(&config_path, &["coverage"]);
    assert!(coverage.contains("Covered events: 25"));
    assert!(coverage.contains("browser.visit"));
}

#[test]
fn test_backfill_rerun_skips_everything() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 10);

    run_evx(&config_path, &["init"]);
    let (_, _, success1) = run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);
    assert!(success1);

    let (stdout, _, success2) =
        run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);
    assert!(success2);
    assert!(stdout.contains("10 skipped"));
    assert!(stdout.contains("0 failed"));
}

#[test]
fn test_backfill_skip_vectorized_false_reembeds() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 5);

    run_evx(&config_path, &["init"]);
    let (_, _, success1) = run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);
    assert!(success1);

    // Bypassing the skip re-embeds every event; the store refuses the
    // duplicate rows, so coverage is unchanged.
    let (stdout, stderr, success2) = run_evx(
        &config_path,
        &[
            "backfill",
            events_path.to_str().unwrap(),
            "--skip-vectorized",
            "false",
        ],
    );
    assert!(
        success2,
        "backfill failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("5 ok"));
    assert!(stdout.contains("0 skipped"));
    assert!(stdout.contains("0 failed"));

    let (coverage, _, _) = run_evx(&config_path, &["coverage"]);
    assert!(coverage.contains("Covered events: 5"));
}

#[test]
fn test_backfill_max_events_prints_resume_cursor() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 25);

    run_evx(&config_path, &["init"]);
    let (stdout, _, success) = run_evx(
        &config_path,
        &[
            "backfill",
            events_path.to_str().unwrap(),
            "--max-events",
            "10",
        ],
    );
    assert!(success);
    assert!(stdout.contains("10 processed"));
    assert!(stdout.contains("--cursor evt_009"));

    // Resume from the cursor and finish the rest.
    let (stdout, _, success) = run_evx(
        &config_path,
        &[
            "backfill",
            events_path.to_str().unwrap(),
            "--cursor",
            "evt_009",
        ],
    );
    assert!(success);
    assert!(stdout.contains("15 processed"));

    let (coverage, _, _) = run_evx(&config_path, &["coverage"]);
    assert!(coverage.contains("Covered events: 25"));
}

#[test]
fn test_backfill_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 5);

    run_evx(&config_path, &["init"]);
    let (stdout, _, success) = run_evx(
        &config_path,
        &["backfill", events_path.to_str().unwrap(), "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("(dry run)"));
    assert!(stdout.contains("5 matched"));

    let (coverage, _, _) = run_evx(&config_path, &["coverage"]);
    assert!(coverage.contains("Covered events: 0"));
}

#[test]
fn test_backfill_event_type_filter() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 5);

    run_evx(&config_path, &["init"]);
    let (stdout, _, success) = run_evx(
        &config_path,
        &[
            "backfill",
            events_path.to_str().unwrap(),
            "--event-type",
            "finance.transaction_created",
        ],
    );
    assert!(success);
    assert!(stdout.contains("0 matched"));
}

#[test]
fn test_search_finds_vectorized_events() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 5);

    run_evx(&config_path, &["init"]);
    run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);

    let (stdout, stderr, success) = run_evx(
        &config_path,
        &["search", "Rust async book", "--limit", "3"],
    );
    assert!(
        success,
        "search failed: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(stdout.contains("Results for: Rust async book"));
    assert!(stdout.contains("browser.visit"));
}

#[test]
fn test_search_filters_by_domain() {
    let (tmp, config_path) = setup_test_env();
    let events_path = write_events_jsonl(tmp.path(), 3);

    run_evx(&config_path, &["init"]);
    run_evx(&config_path, &["backfill", events_path.to_str().unwrap()]);

    let (stdout, _, success) = run_evx(
        &config_path,
        &["search", "anything", "--domain", "finance"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_qa_suite_passes() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_evx(&config_path, &["qa"]);
    assert!(success, "qa failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("0 failed"));
    assert!(!stdout.contains("FAIL"));
}

#[test]
fn test_policies_lists_builtin_types() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_evx(&config_path, &["policies"]);
    assert!(success);
    assert!(stdout.contains("finance.transaction_created"));
    assert!(stdout.contains("structured"));
    assert!(stdout.contains("(default)"));
}
