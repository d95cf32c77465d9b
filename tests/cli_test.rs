//! End-to-end tests driving the `chris` binary against a temporary data directory.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn chris(data_dir: &Path, args: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_chris"))
    .arg("--data-dir")
    .arg(data_dir)
    .args(args)
    .env("RUST_LOG", "off")
    .output()
    .expect("failed to run chris")
}

fn chris_json(data_dir: &Path, args: &[&str]) -> Value {
  let output = chris(data_dir, args);
  assert!(
    output.status.success(),
    "chris {:?} failed: {}",
    args,
    String::from_utf8_lossy(&output.stderr)
  );
  serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn register_plugins(data_dir: &Path) {
  let fs = data_dir.join("dircopy.json");
  std::fs::write(
    &fs,
    r#"{
      "id": 1, "name": "dircopy", "version": "2.1.1", "type": "fs",
      "min_cpu_limit": "1000m", "min_memory_limit": "200Mi",
      "min_number_of_workers": 1, "min_gpu_limit": 0,
      "parameters": [{"id": 1, "plugin_id": 1, "name": "dir", "type": "path"}]
    }"#,
  )
  .unwrap();
  let ds = data_dir.join("simpledsapp.json");
  std::fs::write(
    &ds,
    r#"{
      "id": 2, "name": "simpledsapp", "version": "2.0.2", "type": "ds",
      "min_cpu_limit": "1000m", "min_memory_limit": "200Mi",
      "min_number_of_workers": 1, "min_gpu_limit": 0,
      "parameters": [{"id": 2, "plugin_id": 2, "name": "sleepLength", "type": "integer", "optional": true}]
    }"#,
  )
  .unwrap();

  chris_json(data_dir, &["plugin", "add", fs.to_str().unwrap()]);
  chris_json(data_dir, &["plugin", "add", ds.to_str().unwrap()]);
}

#[test]
fn test_create_and_navigate_across_invocations() {
  let dir = tempfile::tempdir().unwrap();
  let data_dir = dir.path();
  register_plugins(data_dir);

  let root = chris_json(
    data_dir,
    &["create", "1", "--owner", "alice", "--param", "1=/home/alice/in"],
  );
  assert_eq!(root["id"], 1);
  assert_eq!(root["status"], "created");

  let child = chris_json(
    data_dir,
    &["create", "2", "--owner", "alice", "--previous", "1", "--param", "2=5"],
  );
  assert_eq!(child["previous"], 1);
  assert_eq!(child["feed"], 1);

  let path = chris(data_dir, &["path", "2"]);
  assert!(path.status.success());
  assert_eq!(
    String::from_utf8_lossy(&path.stdout).trim(),
    "alice/feed_1/dircopy_1/simpledsapp_2/data"
  );

  let root = chris_json(data_dir, &["root", "2"]);
  assert_eq!(root["id"], 1);

  let params = chris_json(data_dir, &["params", "2"]);
  assert_eq!(params[0]["value"]["type"], "integer");
  assert_eq!(params[0]["value"]["value"], 5);
}

#[test]
fn test_status_conflict_is_reported() {
  let dir = tempfile::tempdir().unwrap();
  let data_dir = dir.path();
  register_plugins(data_dir);
  chris_json(data_dir, &["create", "1", "--owner", "alice"]);

  let record = chris_json(data_dir, &["status", "1", "created", "waiting"]);
  assert_eq!(record["status"], "waiting");

  let output = chris(data_dir, &["status", "1", "created", "waiting"]);
  assert!(!output.status.success());
  assert!(String::from_utf8_lossy(&output.stderr).contains("conflict"));
}

#[test]
fn test_split_creates_children_and_records_history() {
  let dir = tempfile::tempdir().unwrap();
  let data_dir = dir.path();
  register_plugins(data_dir);
  chris_json(data_dir, &["create", "1", "--owner", "alice"]);

  let outcome = chris_json(
    data_dir,
    &["split", "1", "--owner", "alice", "--filter", "a,b", "--plugin", "2", "--plugin", "2"],
  );
  assert_eq!(outcome["created"].as_array().unwrap().len(), 2);

  let splits = chris_json(data_dir, &["splits", "1"]);
  assert_eq!(splits[0]["filter"], "a,b");
  assert_eq!(splits[0]["created_plugin_inst_ids"], serde_json::json!([2, 3]));

  // The split lock is released afterwards.
  chris_json(data_dir, &["lock", "1"]);
}

#[test]
fn test_unknown_plugin_fails() {
  let dir = tempfile::tempdir().unwrap();
  let output = chris(dir.path(), &["create", "42", "--owner", "alice"]);
  assert!(!output.status.success());
}
