//! Scenario service
//!
//! Ties the repository, the install index and the engine together.
//! Installing only records the scenario in the workspace index; fetching
//! the skills it depends on is left to the skill manager.

use nodemesh_core::{Event, ScenarioModel, ScenarioRow, SCENARIOS_INSTALLED};
use nodemesh_storage::SharedRegistryStore;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::info;

use super::{Result, ScenarioEngine, ScenarioRepository};
use crate::bus::EventBus;

pub struct ScenarioService {
    repository: ScenarioRepository,
    store: SharedRegistryStore,
    bus: Arc<EventBus>,
    engine: Arc<ScenarioEngine>,
}

impl std::fmt::Debug for ScenarioService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioService")
            .field("repository", &self.repository)
            .field("engine", &self.engine)
            .finish()
    }
}

impl ScenarioService {
    pub fn new(
        repository: ScenarioRepository,
        store: SharedRegistryStore,
        bus: Arc<EventBus>,
        engine: Arc<ScenarioEngine>,
    ) -> Self {
        Self {
            repository,
            store,
            bus,
            engine,
        }
    }

    pub fn repository(&self) -> &ScenarioRepository {
        &self.repository
    }

    pub fn engine(&self) -> &Arc<ScenarioEngine> {
        &self.engine
    }

    /// Record `scenario_id` as installed in `workspace_id` and announce it
    pub async fn install(&self, scenario_id: &str, workspace_id: &str) -> Result<ScenarioRow> {
        let model = self.repository.load(scenario_id)?;

        let skills = model.skill_dependencies();
        if !skills.is_empty() {
            info!(scenario = %model.id, skills = ?skills, "scenario depends on skills");
        }

        let row = self
            .store
            .upsert_scenario(workspace_id, &model.id, &model.version)
            .await?;

        self.bus.publish(
            &Event::new(
                SCENARIOS_INSTALLED,
                json!({
                    "workspace_id": row.workspace_id,
                    "scenario_id": row.scenario_id,
                    "version": row.version,
                }),
            )
            .with_source("scenario.service"),
        );

        info!(
            scenario = %row.scenario_id,
            workspace = %row.workspace_id,
            version = %row.version,
            "scenario installed"
        );
        Ok(row)
    }

    pub async fn list_installed(&self, workspace_id: &str) -> Result<Vec<ScenarioRow>> {
        Ok(self.store.list_installed(workspace_id).await?)
    }

    pub async fn is_installed(&self, workspace_id: &str, scenario_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_scenario(workspace_id, scenario_id)
            .await?
            .is_some())
    }

    /// Load and run a scenario by id.
    ///
    /// Blocks for the whole run; call from a blocking context.
    pub fn run(&self, scenario_id: &str) -> Result<Map<String, Value>> {
        let model = self.repository.load(scenario_id)?;
        self.run_model(&model)
    }

    pub fn run_model(&self, model: &ScenarioModel) -> Result<Map<String, Value>> {
        self.engine.run(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioError;
    use nodemesh_storage::create_memory_store;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DOC: &str = r#"
id: evening
version: 1.2.0
depends: [lights]
steps:
  - call: skills.run
    args: { skill: music_skill, topic: play }
  - set: { done: true }
"#;

    fn service(root: &std::path::Path, bus: Arc<EventBus>) -> ScenarioService {
        let engine = ScenarioEngine::new().with_target(
            nodemesh_core::SKILLS_RUN,
            Arc::new(crate::scenario::SkillsRunTarget::new(Arc::new(
                crate::skills::FnSkillInvoker::new(|_, _, _| Ok(json!({ "ok": true }))),
            ))),
        );
        ScenarioService::new(
            ScenarioRepository::new(root),
            create_memory_store(),
            bus,
            Arc::new(engine),
        )
    }

    fn write_doc(root: &std::path::Path) {
        let dir = root.join("evening");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scenario.yaml"), DOC).unwrap();
    }

    #[tokio::test]
    async fn test_install_indexes_and_publishes() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path());

        let bus = Arc::new(EventBus::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(SCENARIOS_INSTALLED, move |ev| {
            sink.lock().unwrap().push(ev.payload.clone());
        });

        let svc = service(tmp.path(), bus);
        let row = svc.install("evening", "home").await.unwrap();

        assert_eq!(row.version, "1.2.0");
        assert!(svc.is_installed("home", "evening").await.unwrap());
        assert!(!svc.is_installed("office", "evening").await.unwrap());
        assert_eq!(svc.list_installed("home").await.unwrap().len(), 1);
        assert_eq!(
            *events.lock().unwrap(),
            vec![json!({ "workspace_id": "home", "scenario_id": "evening", "version": "1.2.0" })]
        );
    }

    #[tokio::test]
    async fn test_install_unknown_scenario() {
        let tmp = TempDir::new().unwrap();
        let svc = service(tmp.path(), Arc::new(EventBus::new()));
        let err = svc.install("ghost", "home").await.unwrap_err();
        assert!(matches!(err, ScenarioError::NotFound(_)));
        assert!(svc.list_installed("home").await.unwrap().is_empty());
    }

    #[test]
    fn test_run_by_id() {
        let tmp = TempDir::new().unwrap();
        write_doc(tmp.path());
        let svc = service(tmp.path(), Arc::new(EventBus::new()));

        let out = svc.run("evening").unwrap();
        assert_eq!(out["done"], json!(true));
        assert_eq!(out["steps"]["step_1"]["result"]["ok"], json!(true));
    }
}
