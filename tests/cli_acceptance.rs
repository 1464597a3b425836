/// Acceptance tests for the annot binary
///
/// Every test runs the binary inside its own temporary workspace with a
/// RocksDB store, so results persist between invocations of one test.
mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use common::{expr_quest, static_quest};

struct CliWorkspace {
    temp_dir: TempDir,
}

impl CliWorkspace {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let ws = Self { temp_dir };
        fs::create_dir_all(ws.quest_dir()).unwrap();
        ws.write_quest("length_1_0.yaml", &static_quest("4"));
        ws.write_quest("total_1_0.yaml", &expr_quest("", "{{ post.length.value }} + 1"));
        ws.write_quest("q_1_0.yaml", &static_quest("10"));
        ws.write_quest("q_1_3.yaml", &static_quest("13"));
        ws.write_quest("q_2_0.yaml", &static_quest("20"));
        ws
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn quest_dir(&self) -> PathBuf {
        self.path().join("quests")
    }

    fn write_quest(&self, file_name: &str, content: &str) {
        fs::write(self.quest_dir().join(file_name), content).unwrap();
    }

    fn annot(&self) -> Command {
        let mut cmd = Command::new(std::env!("CARGO_BIN_EXE_annot"));
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
            .env("XDG_CACHE_HOME", self.path().join("xdg-cache"))
            .env("ANNOT_QUEST_DIR", self.quest_dir())
            .env(
                "ANNOT_STORE_URL",
                format!("rocksdb://{}", self.path().join("store").display()),
            )
            .env_remove("ANNOT_CONFIG")
            .env_remove("ANNOT_SOURCE_URL")
            .env("RUST_LOG", "warn");
        cmd
    }
}

#[test]
fn test_quests_list() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["quests", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("q_1_3"))
        .stdout(predicate::str::contains("total_1_0"));
}

#[test]
fn test_quests_resolve() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["quests", "resolve", "q_1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("q_1 -> q_1_3"));

    ws.annot()
        .args(["quests", "resolve", "q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("q -> q_2_0"));

    ws.annot()
        .args(["quests", "resolve", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown quest"));
}

#[test]
fn test_run_then_serve_from_store() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["run", "total", "--text", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::diff("5\n"));

    ws.annot()
        .args(["run", "total", "--text", "hello", "--only-cache", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"value\": 5"))
        .stdout(predicate::str::contains("length_1_0"));
}

#[test]
fn test_only_cache_miss_prints_none() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["run", "total", "--text", "never seen", "--only-cache"])
        .assert()
        .success()
        .stdout(predicate::str::diff("None\n"));
}

#[test]
fn test_no_write_does_not_persist() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["run", "q", "--text", "x", "--no-write"])
        .assert()
        .success()
        .stdout(predicate::str::diff("20\n"));

    ws.annot()
        .args(["run", "q", "--text", "x", "--only-cache"])
        .assert()
        .success()
        .stdout(predicate::str::diff("None\n"));
}

#[test]
fn test_render_prints_document() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["render", "total", "--text", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("method: expr"))
        .stdout(predicate::str::contains("4 + 1"));
}

#[test]
fn test_undeclared_override_fails() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["run", "q", "--text", "x", "--args", "q:temperature=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not declared"));
}

#[test]
fn test_missing_input_fails() {
    let ws = CliWorkspace::new();
    ws.annot()
        .args(["run", "q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No input given"));
}

#[test]
fn test_edit_file_input() {
    let ws = CliWorkspace::new();
    let post = ws.path().join("post.txt");
    fs::write(&post, "from a file").unwrap();

    ws.annot()
        .args(["run", "total", "--edit-file"])
        .arg(&post)
        .assert()
        .success()
        .stdout(predicate::str::diff("5\n"));
}

#[test]
fn test_export_latest_per_post() {
    let ws = CliWorkspace::new();
    ws.annot().args(["run", "q_1_0", "--text", "x"]).assert().success();

    ws.annot()
        .args(["export", "q", "--major", "1", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"0\""))
        .stdout(predicate::str::contains("\"value\": 10"));

    ws.annot()
        .args(["export", "q", "--major", "2"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_config_validate_and_generate() {
    let ws = CliWorkspace::new();
    fs::write(
        ws.path().join("annot.toml"),
        "[store]\nurl = \"memory://\"\n\n[quests]\ndir = \"${ANNOT_TEST_QUESTS:-quests}\"\n",
    )
    .unwrap();

    ws.annot()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file is valid"))
        .stdout(predicate::str::contains("memory://"));

    ws.annot()
        .args(["config", "generate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[store]"));

    fs::write(ws.path().join("annot.toml"), "[store]\nurl = \"s3://bucket\"\n").unwrap();
    ws.annot()
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("store.url"));
}
