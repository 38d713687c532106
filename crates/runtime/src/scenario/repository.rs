//! Scenario documents on disk
//!
//! Layout: `<root>/<id>/scenario.yaml` (or `scenario.json`). The directory
//! name doubles as the id when the document does not declare one.

use nodemesh_core::ScenarioModel;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Result, ScenarioError};

const YAML_FILE: &str = "scenario.yaml";
const YML_FILE: &str = "scenario.yml";
const JSON_FILE: &str = "scenario.json";

#[derive(Debug, Clone)]
pub struct ScenarioRepository {
    root: PathBuf,
}

impl ScenarioRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Document path for `id`, if one exists
    pub fn document_path(&self, id: &str) -> Option<PathBuf> {
        let dir = self.root.join(id);
        [YAML_FILE, YML_FILE, JSON_FILE]
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    pub fn load(&self, id: &str) -> Result<ScenarioModel> {
        if id.is_empty() || id.contains(['/', '\\']) || id == ".." {
            return Err(ScenarioError::NotFound(id.to_string()));
        }
        let path = self
            .document_path(id)
            .ok_or_else(|| ScenarioError::NotFound(id.to_string()))?;
        load_file(&path, Some(id))
    }

    /// Ids of every directory holding a scenario document, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ScenarioError::Io {
                    path: self.root.clone(),
                    source,
                });
            }
        };

        let mut ids: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|id| self.document_path(id).is_some())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

/// Parse a scenario file; `.json` is read as JSON, anything else as YAML
pub fn load_file(path: &Path, fallback_id: Option<&str>) -> Result<ScenarioModel> {
    let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let fallback = fallback_id.map(str::to_string).or_else(|| {
        path.parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
    });

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let model = if is_json {
        ScenarioModel::from_json_str(&content, fallback.as_deref())?
    } else {
        ScenarioModel::from_yaml_str(&content, fallback.as_deref())?
    };

    debug!(path = %path.display(), scenario = %model.id, "scenario loaded");
    Ok(model)
}
