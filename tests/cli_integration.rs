// CLI integration tests: build a container from JSON Lines, then query it.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_rim");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn json_lines(output: &Output) -> Vec<Value> {
    std::str::from_utf8(&output.stdout)
        .expect("utf8")
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_json)
        .collect()
}

fn stderr_error(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    parse_json(line)
}

const PLACES: &str = r#"{"name": "tokyo station", "lat": 35.681236, "lon": 139.767125, "pop": 14000000}
{"name": "kyoto", "lat": 35.011564, "lon": 135.768149, "pop": 1460000}
{"name": "osaka", "lat": 34.693738, "lon": 135.502165, "pop": 2750000}
{"name": "yurakucho", "lat": 35.675069, "lon": 139.763328}
"#;

fn build_places(dir: &Path, extra: &[&str]) -> std::path::PathBuf {
    let input = dir.join("places.jsonl");
    std::fs::write(&input, PLACES).expect("write input");
    let output = dir.join("places.rim");
    let mut args = vec![
        "build".to_string(),
        output.to_str().expect("utf8 path").to_string(),
        input.to_str().expect("utf8 path").to_string(),
    ];
    for flag in [
        "--column=name:string",
        "--column=lat:double",
        "--column=lon:double",
        "--column=pop:int",
        "--index=pop",
        "--geo=lat,lon",
        "--ngram=name:2",
    ] {
        args.push(flag.to_string());
    }
    args.extend(extra.iter().map(|s| s.to_string()));
    let build = cmd().args(&args).output().expect("build");
    assert!(build.status.success(), "{}", String::from_utf8_lossy(&build.stderr));
    let receipt = parse_json(std::str::from_utf8(&build.stdout).expect("utf8"));
    assert_eq!(receipt["rows"], 4);
    assert!(receipt["bytes"].as_u64().expect("bytes") > 0);
    output
}

#[test]
fn build_info_get_flow() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = build_places(temp.path(), &["--compression", "none"]);
    let file = file.to_str().expect("utf8 path");

    let info = cmd().args(["info", file]).output().expect("info");
    assert!(info.status.success());
    let info = parse_json(std::str::from_utf8(&info.stdout).expect("utf8"));
    assert_eq!(info["rows"], 4);
    assert_eq!(info["codec"], "none");
    assert_eq!(info["columns"][3]["type"], "int");
    assert_eq!(info["indexes"]["general"][0]["column"], "pop");
    assert_eq!(info["indexes"]["geo"][0]["lat"], "lat");
    assert_eq!(info["indexes"]["ngram"][0]["n"], 2);
    assert_eq!(info["sha256"].as_str().expect("sha").len(), 64);

    let get = cmd().args(["get", file, "3"]).output().expect("get");
    assert!(get.status.success());
    let row = parse_json(std::str::from_utf8(&get.stdout).expect("utf8"));
    assert_eq!(row["row"], 3);
    assert_eq!(row["data"]["name"], "yurakucho");
    assert_eq!(row["data"]["pop"], Value::Null);

    let missing = cmd().args(["get", file, "9"]).output().expect("get");
    assert_eq!(missing.status.code(), Some(7));
    assert_eq!(stderr_error(&missing)["error"]["kind"], "Range");
}

#[test]
fn query_near_and_grep() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = build_places(temp.path(), &[]);
    let file = file.to_str().expect("utf8 path");

    let query = cmd()
        .args(["query", file, "pop", "ge", "2000000", "--desc"])
        .output()
        .expect("query");
    assert!(query.status.success());
    let names: Vec<String> = json_lines(&query)
        .iter()
        .map(|row| row["data"]["name"].as_str().expect("name").to_string())
        .collect();
    assert_eq!(names, vec!["tokyo station", "osaka"]);

    let negated = cmd()
        .args(["query", file, "pop", "in", "1460000", "--not"])
        .output()
        .expect("query");
    assert_eq!(json_lines(&negated).len(), 2);

    let near = cmd()
        .args(["near", file, "35.681236", "139.767125", "1000", "--nearest", "--precise", "wgs84"])
        .output()
        .expect("near");
    assert!(near.status.success());
    let hits = json_lines(&near);
    let rows: Vec<u64> = hits.iter().map(|hit| hit["row"].as_u64().expect("row")).collect();
    assert_eq!(rows, vec![0, 3]);
    assert!(hits[1]["precise_m"].as_f64().expect("precise") < 1000.0);

    let grep = cmd()
        .args(["grep", file, "name", "o", "--distinct"])
        .output()
        .expect("grep");
    assert!(grep.status.success());
    let rows: Vec<u64> = json_lines(&grep)
        .iter()
        .map(|hit| hit["row"].as_u64().expect("row"))
        .collect();
    assert!(rows.is_empty(), "single-letter query is shorter than the bigram index");

    let grep = cmd()
        .args(["grep", file, "name", "to", "-n", "5"])
        .output()
        .expect("grep");
    let hits = json_lines(&grep);
    let found: Vec<(u64, u64)> = hits
        .iter()
        .map(|hit| (hit["row"].as_u64().expect("row"), hit["position"].as_u64().expect("pos")))
        .collect();
    assert_eq!(found, vec![(0, 0), (1, 3)]);
}

#[test]
fn build_from_stdin_with_spec_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let spec = temp.path().join("spec.json");
    std::fs::write(
        &spec,
        r#"{"columns": [{"name": "id", "type": "long"}, {"name": "at", "type": "date"}], "indexes": ["at"]}"#,
    )
    .expect("write spec");
    let output = temp.path().join("events.rim");

    let mut child = cmd()
        .args([
            "build",
            output.to_str().expect("utf8 path"),
            "--spec",
            spec.to_str().expect("utf8 path"),
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"[1, \"2024-01-02T00:00:00Z\"]\n[2, 1700000000000]\n")
        .expect("write stdin");
    let built = child.wait_with_output().expect("wait");
    assert!(built.status.success(), "{}", String::from_utf8_lossy(&built.stderr));

    let query = cmd()
        .args(["query", output.to_str().expect("utf8 path"), "at", "gt", "\"2023-12-31T00:00:00Z\""])
        .output()
        .expect("query");
    assert!(query.status.success());
    let rows = json_lines(&query);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["data"]["id"], 1);
    assert_eq!(rows[0]["data"]["at"], 1_704_153_600_000i64);
}

#[test]
fn errors_are_json_with_stable_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");

    let missing = cmd()
        .args(["info", temp.path().join("nope.rim").to_str().expect("utf8 path")])
        .output()
        .expect("info");
    assert_eq!(missing.status.code(), Some(3));
    assert_eq!(stderr_error(&missing)["error"]["kind"], "NotFound");

    let garbage = temp.path().join("garbage.rim");
    std::fs::write(&garbage, b"not a container").expect("write");
    let corrupt = cmd()
        .args(["info", garbage.to_str().expect("utf8 path")])
        .output()
        .expect("info");
    assert_eq!(corrupt.status.code(), Some(5));
    assert_eq!(stderr_error(&corrupt)["error"]["kind"], "Format");

    let usage = cmd().args(["query"]).output().expect("usage");
    assert_eq!(usage.status.code(), Some(2));

    let input = temp.path().join("rows.jsonl");
    std::fs::write(&input, "[1]\n[\"x\"]\n").expect("write");
    let bad_row = cmd()
        .args([
            "build",
            temp.path().join("out.rim").to_str().expect("utf8 path"),
            input.to_str().expect("utf8 path"),
            "--column",
            "id:int",
        ])
        .output()
        .expect("build");
    assert_eq!(bad_row.status.code(), Some(4));
    let err = stderr_error(&bad_row);
    assert_eq!(err["error"]["row"], 2);
    assert_eq!(err["error"]["column"], "id");

    let file = build_places(temp.path(), &[]);
    let unindexed = cmd()
        .args(["grep", file.to_str().expect("utf8 path"), "pop", "12"])
        .output()
        .expect("grep");
    assert_eq!(unindexed.status.code(), Some(4));
}
