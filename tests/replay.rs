use std::fs;

use serde_json::json;
use tempfile::TempDir;

use collective_graph::commands::replay::replay;

const S1: &str = "localhost,/wlp/usr,s1";

fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn init(dir: &TempDir) -> std::path::PathBuf {
    let fixtures = json!({
        "hosts/localhost": {
            "id": "localhost",
            "servers": {"up": 1, "down": 0, "unknown": 0, "list": [S1]}
        },
        format!("servers/{}", S1): {
            "id": S1,
            "state": "STARTED",
            "wlpInstallDir": "/opt/wlp",
            "apps": {"up": 1, "down": 0, "unknown": 0, "list": [{"name": "snoop", "state": "STARTED"}]}
        }
    });
    write(dir, "init.json", &fixtures.to_string())
}

#[tokio::test]
async fn replay_reports_final_state_and_notifications() {
    let dir = TempDir::new().unwrap();
    let init = init(&dir);
    let events = write(
        &dir,
        "events.ndjson",
        &[
            json!({"type": "server", "id": S1, "state": "STOPPED"}).to_string(),
            json!({"type": "server", "id": "localhost,/wlp/usr,other", "state": "STOPPED"}).to_string(),
        ]
        .join("\n"),
    );

    let output = replay(&init, &events, &format!("servers/{}", urlencoding::encode(S1))).await.unwrap();

    assert_eq!(output["received"], 2);
    assert_eq!(output["applied"], 1);
    assert_eq!(output["resource"]["state"], "STOPPED");
    let notifications = output["notifications"].as_array().unwrap();
    assert!(notifications
        .iter()
        .any(|n| n["resource"] == format!("server:{}", S1) && n["notification"]["event"] == "stateChange"));
}

#[tokio::test]
async fn replay_keeps_the_final_state_of_removed_resources() {
    let dir = TempDir::new().unwrap();
    let init = init(&dir);
    let events = write(
        &dir,
        "events.json",
        &json!([{"type": "host", "id": "localhost", "state": "removed"}]).to_string(),
    );

    let output = replay(&init, &events, "hosts/localhost/servers").await.unwrap();

    assert_eq!(output["applied"], 1);
    assert_eq!(output["resource"]["id"], "localhost");
    let destroyed: Vec<&str> = output["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["notification"]["event"] == "destroyed")
        .filter_map(|n| n["resource"].as_str())
        .collect();
    assert_eq!(destroyed.len(), 2, "{destroyed:?}");
}

#[tokio::test]
async fn replay_rejects_unresolvable_paths() {
    let dir = TempDir::new().unwrap();
    let init = init(&dir);
    let events = write(&dir, "events.json", "[]");

    assert!(replay(&init, &events, "clusters/nope").await.is_err());
}
