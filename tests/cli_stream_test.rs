//! Integration tests for stream, source, filter and list commands.
//!
//! Accounts point at an unreachable upstream, so these tests exercise the
//! persisted pipeline structure and the degraded refresh path.

mod common;

use common::TestEnv;
use predicates::prelude::*;
use serde_json::json;

#[test]
fn test_stream_create_and_list() {
    let env = TestEnv::new();
    env.tsb()
        .args(["stream", "create", "news", "-d", "daily reading"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""action":"created""#));

    let listed = env.json(&["stream", "list"]);
    assert_eq!(listed["streams"][0]["name"], "news");
    assert_eq!(listed["streams"][0]["description"], "daily reading");
    assert_eq!(listed["streams"][0]["sources"], 0);
}

#[test]
fn test_stream_name_collision() {
    let env = TestEnv::new();
    env.tsb().args(["stream", "create", "news"]).assert().success();
    env.tsb()
        .args(["stream", "create", "news"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Name already in use"));
}

#[test]
fn test_stream_delete() {
    let env = TestEnv::new();
    env.tsb().args(["stream", "create", "a"]).assert().success();
    env.tsb().args(["stream", "create", "b"]).assert().success();
    env.tsb().args(["stream", "delete", "a"]).assert().success();

    let listed = env.json(&["stream", "list"]);
    assert_eq!(listed["streams"].as_array().unwrap().len(), 1);
    assert_eq!(listed["streams"][0]["name"], "b");

    env.tsb()
        .args(["stream", "delete", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_stream_move() {
    let env = TestEnv::new();
    for name in ["a", "b", "c"] {
        env.tsb().args(["stream", "create", name]).assert().success();
    }
    env.tsb().args(["stream", "move", "c", "0"]).assert().success();
    let names: Vec<String> = env.json(&["stream", "list"])["streams"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}

#[test]
fn test_stream_rename() {
    let env = TestEnv::new();
    env.tsb().args(["stream", "create", "news"]).assert().success();
    env.tsb().args(["stream", "create", "sports"]).assert().success();
    env.tsb()
        .args(["stream", "rename", "news", "world"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""action":"renamed""#));

    let names: Vec<String> = env.json(&["stream", "list"])["streams"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["world", "sports"]);

    env.tsb()
        .args(["stream", "rename", "world", "sports"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Name already in use"));
    env.tsb()
        .args(["stream", "show", "news"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not found"));
}

#[test]
fn test_source_add_requires_account() {
    let env = TestEnv::new();
    env.tsb().args(["stream", "create", "news"]).assert().success();
    env.tsb()
        .args(["source", "add", "news", "home-timeline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("tsb account add"));
}

#[test]
fn test_sources_and_filters_persist() {
    let env = TestEnv::with_offline_account();
    env.tsb().args(["stream", "create", "friends"]).assert().success();
    env.tsb()
        .args(["source", "add", "friends", "user-posts", "--target", "serval", "--cache"])
        .assert()
        .success();
    env.tsb()
        .args(["source", "add", "friends", "mentions", "--disabled"])
        .assert()
        .success();
    env.tsb()
        .args(["filter", "add", "friends", "user", "--target", "kaban", "--negative"])
        .assert()
        .success();

    let sources = env.json(&["source", "list", "friends"]);
    assert_eq!(sources["sources"][0]["kind"], "user-posts");
    assert_eq!(sources["sources"][0]["target"], "serval");
    assert_eq!(sources["sources"][0]["cached"], true);
    assert_eq!(sources["sources"][1]["enabled"], false);

    let shown = env.json(&["stream", "show", "friends"]);
    assert_eq!(shown["source_list"], json!(["user-posts:serval", "mentions"]));
    assert_eq!(shown["filter_list"], json!(["!user:kaban"]));

    env.tsb().args(["source", "remove", "friends", "1"]).assert().success();
    env.tsb().args(["filter", "remove", "friends", "0"]).assert().success();
    let shown = env.json(&["stream", "show", "friends"]);
    assert_eq!(shown["sources"], 1);
    assert_eq!(shown["filters"], 0);
}

#[test]
fn test_source_add_validates_target() {
    let env = TestEnv::with_offline_account();
    env.tsb().args(["stream", "create", "s"]).assert().success();
    env.tsb()
        .args(["source", "add", "s", "remote-list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("remote_list_id"));
}

#[test]
fn test_refresh_with_unreachable_upstream_degrades() {
    let env = TestEnv::with_offline_account();
    env.tsb().args(["stream", "create", "timeline"]).assert().success();
    env.tsb()
        .args(["source", "add", "timeline", "home-timeline"])
        .assert()
        .success();

    let refreshed = env.json(&["stream", "refresh", "timeline"]);
    assert_eq!(refreshed["streams"][0]["name"], "timeline");
    assert_eq!(refreshed["streams"][0]["new_messages"], json!([]));
}

#[test]
fn test_init_without_accounts_fails() {
    let env = TestEnv::new();
    env.tsb()
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no accounts configured"));
}

#[test]
fn test_init_provisions_streams_once() {
    let env = TestEnv::with_offline_account();
    let first = env.json(&["init"]);
    assert_eq!(first["created"].as_array().unwrap().len(), 3);

    let second = env.json(&["init"]);
    assert_eq!(second["created"], json!([]));
    assert_eq!(second["total_streams"], 3);

    env.tsb()
        .args(["-H", "stream", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tester/timeline"))
        .stdout(predicate::str::contains("tester/mentions"))
        .stdout(predicate::str::contains("tester/favourites"));
}

#[test]
fn test_stream_purge() {
    let env = TestEnv::with_offline_account();
    env.tsb().args(["stream", "create", "gone"]).assert().success();
    env.tsb()
        .args(["source", "add", "gone", "mentions", "--cache"])
        .assert()
        .success();
    env.tsb()
        .args(["stream", "delete", "gone", "--purge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("purged"));
    assert_eq!(env.json(&["stream", "list"])["streams"], json!([]));
}

#[test]
fn test_local_user_lists() {
    let env = TestEnv::new();
    env.tsb()
        .args(["list", "create", "friends", "serval", "kaban"])
        .assert()
        .success();
    env.tsb().args(["list", "add", "friends", "toki"]).assert().success();
    env.tsb()
        .args(["list", "remove", "friends", "kaban"])
        .assert()
        .success();

    let shown = env.json(&["list", "show"]);
    assert_eq!(shown["lists"][0]["name"], "friends");
    assert_eq!(shown["lists"][0]["users"], json!(["serval", "toki"]));

    env.tsb()
        .args(["list", "create", "friends"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Name already in use"));
}
