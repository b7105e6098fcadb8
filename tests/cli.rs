//! Smoke tests against the built `reposearch` binary.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::MockGitHub;

fn reposearch_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("reposearch");
    path
}

fn setup_test_env(api_url: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/reposearch.sqlite"

[chunking]
chunk_size = 400
chunk_overlap = 40

[github]
fetcher = "api"
api_url = "{api_url}"

[indexing]
work_dir = "{root}/work"
"#,
        root = root.display(),
        api_url = api_url,
    );

    let config_path = config_dir.join("reposearch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_reposearch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = reposearch_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("GITHUB_TOKEN")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run reposearch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_reposearch(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_reposearch(&config_path, &["init"]);
    assert!(success, "second init failed");
}

#[test]
fn test_list_empty() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, stderr, success) = run_reposearch(&config_path, &["list"]);
    assert!(success, "list failed: {}", stderr);
    assert!(stdout.contains("No repositories indexed."));
}

#[test]
fn test_delete_unknown_repository_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_reposearch(&config_path, &["delete", "acme/widgets"]);
    assert!(!success);
    assert!(stderr.contains("not indexed"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_repository_identifier() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_reposearch(&config_path, &["index", "just-a-name"]);
    assert!(!success);
    assert!(stderr.contains("invalid repository identifier"), "stderr: {}", stderr);
}

#[test]
fn test_blank_search_prints_no_results() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, _, success) = run_reposearch(&config_path, &["search", "  "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_without_embedder_fails() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (_, stderr, success) = run_reposearch(&config_path, &["search", "widgets"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_index_records_progress_when_embedding_is_disabled() {
    let github = MockGitHub::start(
        "acme",
        "widgets",
        "rev1",
        &[("README.md", "# Widgets\n"), ("src/main.rs", "fn main() {}\n")],
    );
    let (tmp, config_path) = setup_test_env(&github.api_url);

    let (_, stderr, success) = run_reposearch(&config_path, &["index", "acme/widgets"]);
    assert!(!success, "embedding is disabled, index must fail");
    assert!(stderr.contains("embed stage failed"), "stderr: {}", stderr);

    let (stdout, _, success) = run_reposearch(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("acme/widgets"));
    assert!(stdout.contains("revision:  rev1"));
    assert!(stdout.contains("files:     2"));
    assert!(stdout.contains("download=succeeded chunking=succeeded embedding=failed"));

    // Scratch directories are gone even though the run failed.
    let leftovers = fs::read_dir(tmp.path().join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    let (stdout, _, success) = run_reposearch(&config_path, &["delete", "acme/widgets"]);
    assert!(success);
    assert!(stdout.contains("Deleted acme/widgets."));
}

#[test]
fn test_unknown_repository_is_reported() {
    let github = MockGitHub::start("acme", "widgets", "rev1", &[]);
    let (_tmp, config_path) = setup_test_env(&github.api_url);

    let (_, stderr, success) = run_reposearch(&config_path, &["index", "acme/ghost"]);
    assert!(!success);
    assert!(stderr.contains("not accessible"), "stderr: {}", stderr);

    let (stdout, _, _) = run_reposearch(&config_path, &["list"]);
    assert!(stdout.contains("No repositories indexed."));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env("http://127.0.0.1:9");

    let (stdout, _, success) = run_reposearch(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("reposearch"));
}
