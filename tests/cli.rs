use assert_cmd::Command;
use predicates::prelude::*;

fn video_digest() -> Command {
    let mut cmd = Command::cargo_bin("video-digest").unwrap();
    cmd.env_remove("OPENAI_API_KEY").env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_commands() {
    video_digest()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_run_without_api_key_fails() {
    video_digest()
        .args(["run", "https://youtu.be/dQw4w9WgXcQ", "--quiet"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key is required"));
}

#[test]
fn test_missing_local_file_fails_at_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.json");

    video_digest()
        .args(["run", "/no/such/dir/clip.mp4", "--until", "fetch", "--quiet", "--report"])
        .arg(&report)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("at stage fetch"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["status"], "failed");
    assert_eq!(json["failure"]["stage"], "fetch");
}

#[test]
fn test_local_file_until_fetch_is_partial_success() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clip.mp4");
    std::fs::write(&input, b"not really a video").unwrap();
    let copy = dir.path().join("fetched.mp4");

    video_digest()
        .arg("run")
        .arg(&input)
        .args(["--until", "fetch", "--quiet", "--format", "json", "--output"])
        .arg(&copy)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"partially_completed\""));

    assert_eq!(std::fs::read(&copy).unwrap(), b"not really a video");
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.yaml");
    std::fs::write(&config, "generate:\n  retry:\n    max_attempts: 0\n").unwrap();

    video_digest()
        .args(["config", "--show", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn test_config_show_prints_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("empty.yaml");
    std::fs::write(&config, "{}\n").unwrap();

    video_digest()
        .args(["config", "--show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("whisper-1"));
}
