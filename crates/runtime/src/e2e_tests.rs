//! E2E Tests - scenario runs through a started mesh node
//!
//! Covers the full path: scenario document -> engine -> skill calls ->
//! `ui.notify` on the bus -> router -> console or relay.

use crate::io::{MemoryConsole, MemoryVoice};
use crate::node::MeshNode;
use crate::router::{RelayTransport, RouterError};
use crate::scenario::ScenarioEngine;
use crate::skills::{FnSkillInvoker, InvokeError, SharedSkillInvoker};
use async_trait::async_trait;
use nodemesh_core::{CapabilitySet, NodeConfig, NodeInfo, NodeRole, ScenarioModel};
use nodemesh_storage::create_memory_store;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const MORNING_ROUTINE: &str = include_str!("../../../scenarios/morning_routine/scenario.yaml");

fn stub_skills(weather_up: bool) -> SharedSkillInvoker {
    Arc::new(FnSkillInvoker::new(move |skill, topic, payload| match skill {
        "time_skill" => Ok(json!({ "ok": true, "time": "09:00", "message": "Сейчас 09:00" })),
        "weather_skill" if weather_up => Ok(json!({
            "ok": true,
            "city": payload.get("city").and_then(Value::as_str).unwrap_or("Москва"),
            "temp": 18,
            "description": "ясно",
            "message": "В Москве ясно, 18°C",
        })),
        "weather_skill" => Err(InvokeError::Http("weather service timed out".to_string())),
        other => Err(InvokeError::NotFound(format!("{other}/{topic}"))),
    }))
}

#[derive(Default)]
struct RecordingRelay {
    posts: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl RelayTransport for RecordingRelay {
    async fn post_print(&self, base_url: &str, body: &Value, _token: &str) -> Result<(), RouterError> {
        self.posts
            .lock()
            .unwrap()
            .push((base_url.to_string(), body.clone()));
        Ok(())
    }

    async fn lookup_base_url(
        &self,
        _hub_url: &str,
        _node_id: &str,
        _token: &str,
    ) -> Result<Option<String>, RouterError> {
        Ok(None)
    }
}

fn hub_config(base_dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node_id = "hub-1".to_string();
    config.role = NodeRole::Hub;
    config.base_dir = base_dir.to_path_buf();
    config.router.watch_interval_ms = 20;
    config
}

fn install_fixture(base_dir: &Path) {
    let dir = base_dir.join("scenarios").join("morning_routine");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("scenario.yaml"), MORNING_ROUTINE).unwrap();
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[test]
fn test_morning_routine_generates_message() {
    let console = Arc::new(MemoryConsole::new());
    let voice = Arc::new(MemoryVoice::new());
    let engine = ScenarioEngine::standard(
        stub_skills(true),
        Arc::new(crate::bus::EventBus::new()),
        console.clone(),
        voice.clone(),
        "local",
    );
    let scenario = ScenarioModel::from_yaml_str(MORNING_ROUTINE, Some("morning_routine")).unwrap();

    let result = engine.run(&scenario).unwrap();

    let steps = result["steps"].as_object().unwrap();
    assert!(steps.contains_key("get_time"));
    assert!(steps.contains_key("get_weather"));
    assert_eq!(result["time_text"], json!("Сейчас 09:00"));
    assert_eq!(result["weather_text"], json!("Погода: ясно (18°C) в Москва"));

    let msg = result["msg"].as_str().unwrap();
    assert_eq!(
        msg,
        "Утреннее напоминание:\nДоброе утро!\nСейчас 09:00\nПогода: ясно (18°C) в Москва"
    );
    assert_eq!(voice.phrases(), vec![msg.to_string()]);
    assert_eq!(console.lines().len(), 1);
}

#[test]
fn test_morning_routine_weather_fallback() {
    let engine = ScenarioEngine::standard(
        stub_skills(false),
        Arc::new(crate::bus::EventBus::new()),
        Arc::new(MemoryConsole::new()),
        Arc::new(MemoryVoice::new()),
        "local",
    );
    let scenario = ScenarioModel::from_yaml_str(MORNING_ROUTINE, None).unwrap();

    let result = engine.run(&scenario).unwrap();

    assert_eq!(result["time_text"], json!("Сейчас 09:00"));
    assert_eq!(
        result["weather_text"],
        json!("HTTP error: weather service timed out")
    );
    assert_eq!(result["steps"]["weather"]["result"]["ok"], json!(false));
}

#[tokio::test]
async fn test_installed_scenario_prints_through_router() {
    let tmp = TempDir::new().unwrap();
    install_fixture(tmp.path());

    let console = Arc::new(MemoryConsole::new());
    let node = MeshNode::with_parts(
        hub_config(tmp.path()),
        create_memory_store(),
        Arc::new(RecordingRelay::default()),
        console.clone(),
    )
    .await
    .unwrap();
    node.start().unwrap();

    let service = node.scenario_service(
        node.scenario_engine(stub_skills(true), Arc::new(MemoryVoice::new())),
    );
    let row = service.install("morning_routine", "home").await.unwrap();
    assert_eq!(row.version, "0.1.0");

    let result = service.run("morning_routine").unwrap();
    let msg = result["msg"].as_str().unwrap().to_string();

    assert!(wait_until(|| !console.lines().is_empty()).await);
    assert_eq!(
        console.lines(),
        vec![format!("[hub-1] {msg} (from scenario:morning_routine)")]
    );
    node.stop();
}

#[tokio::test]
async fn test_hub_relays_scenario_output_to_member() {
    let tmp = TempDir::new().unwrap();
    install_fixture(tmp.path());
    std::fs::create_dir_all(tmp.path().join("router")).unwrap();
    std::fs::write(
        tmp.path().join("router").join("rules.yaml"),
        "rules:\n  - match: { source: \"scenario:morning_routine\" }\n    target: { node_id: kitchen }\n",
    )
    .unwrap();

    let relay = Arc::new(RecordingRelay::default());
    let console = Arc::new(MemoryConsole::new());
    let node = MeshNode::with_parts(
        hub_config(tmp.path()),
        create_memory_store(),
        relay.clone(),
        console.clone(),
    )
    .await
    .unwrap();
    node.directory()
        .register(
            NodeInfo::new("kitchen")
                .with_base_url("http://kitchen.local:8777")
                .with_capacity(CapabilitySet::new(vec!["console".to_string()], vec![])),
        )
        .await
        .unwrap();
    node.start().unwrap();
    assert_eq!(node.router().rules().len(), 1);

    let service = node.scenario_service(
        node.scenario_engine(stub_skills(true), Arc::new(MemoryVoice::new())),
    );
    let result = service.run("morning_routine").unwrap();

    assert!(wait_until(|| !relay.posts.lock().unwrap().is_empty()).await);
    let posts = relay.posts.lock().unwrap().clone();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "http://kitchen.local:8777");
    assert_eq!(posts[0].1["text"], result["msg"]);
    assert_eq!(posts[0].1["origin"]["from"], json!("hub-1"));
    assert!(console.lines().is_empty());

    node.stop();
}
