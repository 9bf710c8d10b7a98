use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_relayctl<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_relayctl"))
        .args(args)
        .env_remove("RELAY_STORE")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute relayctl binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_relayctl(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "relayctl command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn content_ref(seed: &str) -> String {
    format!("{seed:<15}{}{seed:>24}-tail", "x".repeat(29))
}

fn add_record(db: &str, reference: &str, kind: &str, name: Option<&str>) -> Value {
    let mut args = vec![
        "--db".to_string(),
        db.to_string(),
        "record".to_string(),
        "add".to_string(),
        "--content-ref".to_string(),
        reference.to_string(),
        "--kind".to_string(),
        kind.to_string(),
    ];
    if let Some(name) = name {
        args.push("--name".to_string());
        args.push(name.to_string());
    }
    run_json(args)
}

#[test]
fn store_init_creates_header_and_validates() {
    let dir = unique_temp_dir("relayctl-init");
    let db = dir.join("data").join("archive.csv");

    let init = run_json(["--db", path_str(&db), "store", "init"]);
    assert_eq!(init.get("created").and_then(Value::as_bool), Some(true));
    assert_eq!(as_str(&init, "contract_version"), "cli.v1");

    let again = run_json(["--db", path_str(&db), "store", "init"]);
    assert_eq!(again.get("created").and_then(Value::as_bool), Some(false));

    let report = run_json(["--db", path_str(&db), "store", "validate"]);
    assert_eq!(report.get("header_matches").and_then(Value::as_bool), Some(true));
    assert_eq!(as_u64(&report, "total_rows"), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_add_show_and_dedup_flow() {
    let dir = unique_temp_dir("relayctl-records");
    let db = dir.join("archive.csv");
    let db = path_str(&db);

    let added = add_record(db, &content_ref("BQACAgIAAxkBAA"), "document", Some("q3, \"final\".pdf"));
    assert_eq!(added.get("deduplicated").and_then(Value::as_bool), Some(false));
    let record = added.get("record").unwrap_or_else(|| panic!("missing record: {added}"));
    let handle = as_str(record, "handle").to_string();
    assert_eq!(handle.len(), 16);
    assert!(handle.bytes().all(|byte| byte.is_ascii_digit()));

    let repeat = add_record(db, &content_ref("BQACAgIAAxkBAA"), "document", None);
    assert_eq!(repeat.get("deduplicated").and_then(Value::as_bool), Some(true));
    let repeat_record = repeat.get("record").unwrap_or_else(|| panic!("missing record: {repeat}"));
    assert_eq!(as_str(repeat_record, "handle"), handle);

    let shown = run_json(["--db", db, "record", "show", "--handle", &handle]);
    assert_eq!(as_str(&shown, "display_name"), "q3, \"final\".pdf");
    assert_eq!(as_str(&shown, "content_kind"), "Document");

    let listed = run_json(["--db", db, "record", "list"]);
    let records = listed
        .get("records")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing records array: {listed}"));
    assert_eq!(records.len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_add_without_name_uses_kind_default() {
    let dir = unique_temp_dir("relayctl-default-name");
    let db = dir.join("archive.csv");

    let added = add_record(path_str(&db), &content_ref("AgACAgIAAxkBAA"), "unknown", None);
    let record = added.get("record").unwrap_or_else(|| panic!("missing record: {added}"));
    assert_eq!(as_str(record, "display_name"), "Unknown file name");
    assert_eq!(as_str(record, "content_kind"), "Unknown");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_show_unknown_handle_fails() {
    let dir = unique_temp_dir("relayctl-missing");
    let db = dir.join("archive.csv");

    let output = run_relayctl(["--db", path_str(&db), "record", "show", "--handle", "0000000000000000"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("0000000000000000"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn record_lookup_matches_partial_reference() {
    let dir = unique_temp_dir("relayctl-lookup");
    let db = dir.join("archive.csv");
    let db = path_str(&db);

    add_record(db, &content_ref("BAACAgIAAxkBAA"), "video", Some("clip.mp4"));

    let found = run_json([
        "--db",
        db,
        "record",
        "lookup",
        "--content-ref",
        &content_ref("BAACAgIAAxkBAA").replace("xxxx", "yyyy"),
    ]);
    assert_eq!(found.get("found").and_then(Value::as_bool), Some(true));

    let missing =
        run_json(["--db", db, "record", "lookup", "--content-ref", &content_ref("CQACAgIAAxkBAA")]);
    assert_eq!(missing.get("found").and_then(Value::as_bool), Some(false));
    assert!(missing.get("record").is_some_and(Value::is_null));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn store_trim_keeps_requested_rows() {
    let dir = unique_temp_dir("relayctl-trim");
    let db = dir.join("archive.csv");
    let db_str = path_str(&db);
    for seed in ["AAAAAAAAAAAAAA1", "AAAAAAAAAAAAAA2", "AAAAAAAAAAAAAA3"] {
        add_record(db_str, &content_ref(seed), "photo", None);
    }

    let out = dir.join("trimmed.csv");
    let summary = run_json(["--db", db_str, "store", "trim", "--keep", "2", "--out", path_str(&out)]);
    assert_eq!(as_u64(&summary, "kept_rows"), 2);
    assert_eq!(as_u64(&summary, "dropped_rows"), 1);

    let listed = run_json(["--db", path_str(&out), "record", "list"]);
    assert_eq!(listed.get("records").and_then(Value::as_array).map(Vec::len), Some(2));

    let original = run_json(["--db", db_str, "record", "list"]);
    assert_eq!(original.get("records").and_then(Value::as_array).map(Vec::len), Some(3));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn store_reformat_rewrites_legacy_file() {
    let dir = unique_temp_dir("relayctl-reformat");
    let legacy = dir.join("legacy.csv");
    fs::write(&legacy, "1111,'ref-one', one.pdf ,Document\n2222,ref-two\n3333,ref-three,three,Photo\n")
        .unwrap_or_else(|err| panic!("failed to write legacy store: {err}"));

    let out = dir.join("fixed.csv");
    let summary =
        run_json(["--db", path_str(&legacy), "store", "reformat", "--out", path_str(&out)]);
    assert_eq!(as_u64(&summary, "rows_written"), 2);
    assert_eq!(as_u64(&summary, "dropped_short_rows"), 1);
    assert_eq!(summary.get("header_detected").and_then(Value::as_bool), Some(false));

    let report = run_json(["--db", path_str(&out), "store", "validate"]);
    assert_eq!(report.get("header_matches").and_then(Value::as_bool), Some(true));

    let shown = run_json(["--db", path_str(&out), "record", "show", "--handle", "1111"]);
    assert_eq!(as_str(&shown, "content_ref"), "ref-one");
    assert_eq!(as_str(&shown, "display_name"), "one.pdf");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn debug_logging_goes_to_stderr_only() {
    let dir = unique_temp_dir("relayctl-logging");
    let db = dir.join("archive.csv");

    let output = Command::new(env!("CARGO_BIN_EXE_relayctl"))
        .args(["--db", path_str(&db), "record", "list"])
        .env_remove("RELAY_STORE")
        .env("RUST_LOG", "debug")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute relayctl binary: {err}"));
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("running record command"), "stderr: {stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"));
    assert_eq!(as_str(&value, "contract_version"), "cli.v1");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn headerless_store_warns_on_list() {
    let dir = unique_temp_dir("relayctl-headerless");
    let db = dir.join("archive.csv");
    fs::write(&db, "1111,ref-one,one.pdf,Document\n")
        .unwrap_or_else(|err| panic!("failed to write store: {err}"));

    let output = run_relayctl(["--db", path_str(&db), "record", "list"]);
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("record store has no header row"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}
