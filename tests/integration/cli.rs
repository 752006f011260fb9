//! Exit codes and output of the command-line binary

use assert_cmd::Command;
use crm_migrator::checkpoint::Checkpoint;
use tempfile::TempDir;

fn cli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("crm-migrator").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("STACKBY_API_KEY")
        .env_remove("RUST_LOG")
        .arg("--log-file")
        .arg(dir.path().join("migration.log"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = cli(&dir).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let commands = [
        "migrate",
        "link-contacts",
        "link-companies",
        "link-interactions",
        "recover",
        "dedupe",
        "verify",
        "checkpoint",
    ];
    for command in commands {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_missing_source_file_exits_with_error() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .env("STACKBY_API_KEY", "test-key")
        .args(["migrate", "--table", "contacts", "--source"])
        .arg(dir.path().join("missing.csv"))
        .assert()
        .code(1);
}

#[test]
fn test_missing_engagements_export_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let associations = dir.path().join("associations.json");
    std::fs::write(&associations, "{}").unwrap();
    cli(&dir)
        .env("STACKBY_API_KEY", "test-key")
        .args(["link-interactions", "--associations"])
        .arg(&associations)
        .arg("--interactions")
        .arg(dir.path().join("missing.json"))
        .assert()
        .code(1);
}

#[test]
fn test_missing_api_key_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let associations = dir.path().join("associations.json");
    std::fs::write(&associations, "{}").unwrap();
    cli(&dir)
        .args(["link-companies", "--associations"])
        .arg(&associations)
        .assert()
        .code(1);
    let log = std::fs::read_to_string(dir.path().join("migration.log")).unwrap();
    assert!(log.contains("STACKBY_API_KEY"));
}

#[test]
fn test_unknown_table_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    cli(&dir)
        .args(["verify", "--table", "leads"])
        .assert()
        .code(2);
}

#[test]
fn test_checkpoint_show_missing_file_succeeds() {
    let dir = TempDir::new().unwrap();
    let output = cli(&dir)
        .args(["checkpoint", "show", "--path"])
        .arg(dir.path().join("none.json"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No checkpoint"));
}

#[test]
fn test_checkpoint_show_corrupt_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recover.json");
    std::fs::write(&path, "{\"schema_version\": ").unwrap();
    cli(&dir)
        .args(["checkpoint", "show", "--path"])
        .arg(&path)
        .assert()
        .code(1);
}

#[test]
fn test_checkpoint_show_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("recover.json");
    let mut checkpoint = Checkpoint::new("recover", 5);
    checkpoint.advance();
    checkpoint.save(&path).unwrap();

    let output = cli(&dir)
        .args(["--output-format", "json", "checkpoint", "show", "--path"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["phase"], "recover");
    assert_eq!(json["cursor"], 1);
    assert_eq!(json["total"], 5);
}

#[test]
fn test_checkpoint_clear_removes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("link-companies.json");
    Checkpoint::new("link-companies", 2).save(&path).unwrap();

    cli(&dir)
        .args(["checkpoint", "clear", "--path"])
        .arg(&path)
        .assert()
        .success();
    assert!(!path.exists());
}
