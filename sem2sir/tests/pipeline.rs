//! File-level pipeline behavior: fail-fast with no partial output.

use std::path::PathBuf;

fn fixture(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, text).unwrap();
    path
}

const GOOD: &str = r#"{"ast":{"k":"Unit","items":[{"k":"Proc","name":{"k":"tok","text":"main"},"params":[],"ret":{"k":"TypeRef","name":{"k":"tok","text":"void"}},"body":{"k":"Block","items":[{"k":"Return","value":null}]}}]},"diagnostics":[],"meta":{"types":{}}}"#;

const BAD_SCHEMA: &str = r#"{"ast":{"k":"Unit","items":[{"k":"Bogus"}]},"diagnostics":[],"meta":{"types":{}}}"#;

// Passes the checker but fails lowering: main must not be extern.
const BAD_LOWERING: &str = r#"{"ast":{"k":"Unit","items":[{"k":"Proc","name":{"k":"tok","text":"main"},"params":[],"ret":{"k":"TypeRef","name":{"k":"tok","text":"void"}},"extern":true,"body":null}]},"diagnostics":[],"meta":{"types":{}}}"#;

#[test]
fn emit_file_writes_the_stream_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(&dir, "good.ast.jsonl", GOOD);
    let output = dir.path().join("out.sir.jsonl");
    sem2sir::emit_file(&input, &output).unwrap();
    let stream = std::fs::read_to_string(&output).unwrap();
    let first = stream.lines().next().unwrap();
    assert!(first.contains(r#""ir":"sir-v1.0""#));
    assert!(first.contains(r#""k":"meta""#));
    assert!(stream.contains(r#""tag":"fn""#));
}

#[test]
fn emit_file_unlinks_output_on_check_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(&dir, "bad.ast.jsonl", BAD_SCHEMA);
    let output = dir.path().join("out.sir.jsonl");
    let err = sem2sir::emit_file(&input, &output).unwrap_err();
    assert!(err.to_string().contains("unknown node kind"));
    assert!(!output.exists(), "partial output must be removed");
}

#[test]
fn emit_file_unlinks_output_on_lowering_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(&dir, "bad2.ast.jsonl", BAD_LOWERING);
    let output = dir.path().join("out.sir.jsonl");
    let err = sem2sir::emit_file(&input, &output).unwrap_err();
    assert!(err.to_string().contains("main"));
    assert!(!output.exists(), "partial output must be removed");
}

#[test]
fn check_file_validates_without_emitting() {
    let dir = tempfile::tempdir().unwrap();
    let input = fixture(&dir, "good.ast.jsonl", GOOD);
    sem2sir::check_file(&input).unwrap();
    let input = fixture(&dir, "bad.ast.jsonl", BAD_SCHEMA);
    assert!(sem2sir::check_file(&input).is_err());
}

#[test]
fn check_diag_display_carries_position_and_near() {
    let err = sem2sir::check_text(BAD_SCHEMA).unwrap_err();
    let text = err.to_string();
    assert!(text.contains("line 1"), "{text}");
    assert!(text.contains("near:"), "{text}");
}
