use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

fn inkflow() -> Command {
    let mut cmd = Command::cargo_bin("inkflow").unwrap();
    cmd.env_remove("GEMINI_API_KEY")
        .env_remove("GEMINI_MODEL")
        .env_remove("GEMINI_API_BASE")
        .env_remove("INKFLOW_TIMEOUT_SECS")
        .env_remove("INKFLOW_RENDERER")
        .env_remove("INKFLOW_SESSION_IDLE_SECS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    inkflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: inkflow [OPTIONS] <COMMAND>"))
        .stdout(predicate::str::contains("Commands:"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("convert"))
        .stdout(predicate::str::contains("edit"))
        .stdout(predicate::str::contains("--api-key <API_KEY>"))
        .stdout(predicate::str::contains("env: GEMINI_MODEL"))
        .stdout(predicate::str::contains("env: INKFLOW_TIMEOUT_SECS"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn test_cli_serve_help() {
    inkflow()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: inkflow serve"))
        .stdout(predicate::str::contains("--port <PORT>"))
        .stdout(predicate::str::contains("--renderer <RENDERER>"))
        .stdout(predicate::str::contains("env: INKFLOW_RENDERER"))
        .stdout(predicate::str::contains("specialized"))
        .stdout(predicate::str::contains("generic"));
}

#[test]
fn test_cli_convert_help() {
    inkflow()
        .args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: inkflow convert [OPTIONS] <IMAGE>"))
        .stdout(predicate::str::contains("--context <CONTEXT>"))
        .stdout(predicate::str::contains("--output <OUTPUT>"));
}

#[test]
fn test_cli_no_command() {
    inkflow()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage: inkflow [OPTIONS] <COMMAND>"));
}

#[test]
fn test_convert_without_key_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("sketch.jpg");
    std::fs::write(&image, JPEG_BYTES).unwrap();

    inkflow()
        .current_dir(dir.path())
        .arg("convert")
        .arg(&image)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn test_convert_rejects_non_image_before_calling_model() {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes.txt");
    std::fs::write(&notes, "not a drawing").unwrap();

    inkflow()
        .current_dir(dir.path())
        .env("GEMINI_API_BASE", "http://127.0.0.1:9")
        .args(["--api-key", "dummy", "convert"])
        .arg(&notes)
        .assert()
        .failure()
        .stderr(predicate::str::contains("PNG or JPEG"));
}

#[tokio::test]
async fn test_convert_writes_sanitized_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "cli-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [
                { "text": "```mermaid\nflowchart TD\n  A[Start] --> B[Done]\n```" }
            ] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let image = dir.path().join("sketch.jpg");
    let output = dir.path().join("diagram.mmd");
    std::fs::write(&image, JPEG_BYTES).unwrap();

    let uri = server.uri();
    let (image_arg, output_arg) = (image.clone(), output.clone());
    let dir_path = dir.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        inkflow()
            .current_dir(dir_path)
            .env("GEMINI_API_BASE", uri)
            .args(["--api-key", "cli-key", "--model", "gemini-test", "convert"])
            .arg(image_arg)
            .arg("--output")
            .arg(output_arg)
            .assert()
            .success();
    })
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "flowchart TD\n  A[Start] --> B[Done]"
    );
}

#[tokio::test]
async fn test_blank_api_key_flag_falls_back_to_environment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-env:generateContent"))
        .and(header("x-goog-api-key", "env-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "parts": [{ "text": "graph TD\n  A-->B" }] } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let image = dir.path().join("sketch.jpg");
    std::fs::write(&image, JPEG_BYTES).unwrap();

    let uri = server.uri();
    let dir_path = dir.path().to_path_buf();
    tokio::task::spawn_blocking(move || {
        inkflow()
            .current_dir(dir_path)
            .env("GEMINI_API_BASE", uri)
            .env("GEMINI_API_KEY", "env-key")
            .env("GEMINI_MODEL", "gemini-env")
            .args(["--api-key", "  ", "convert"])
            .arg(image)
            .assert()
            .success()
            .stdout(predicate::str::contains("graph TD\n  A-->B"));
    })
    .await
    .unwrap();
}
