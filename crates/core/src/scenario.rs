//! Scenario documents
//!
//! A scenario is an ordered list of steps over a shared variable context.
//! Documents are YAML or JSON:
//!
//! ```yaml
//! id: morning_routine
//! version: 0.1.0
//! vars: { greeting: "Good morning" }
//! steps:
//!   - name: get_time
//!     call: skills.run
//!     args: { skill: time_skill, topic: nlp.intent.time.get }
//!     save_as: time
//!   - name: format_time
//!     when: "${time.result.ok}"
//!     set: { time_text: "${time.result.message}" }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Call target that dispatches to the skill invocation capability
pub const SKILLS_RUN: &str = "skills.run";

const DEFAULT_VERSION: &str = "0.0.0";

/// Key under which a run's output carries its step entries; not a variable name
pub const STEPS_KEY: &str = "steps";

/// Scenario document errors
#[derive(Debug, Error)]
pub enum ScenarioParseError {
    #[error("YAML parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scenario has no id")]
    MissingId,

    #[error("`{0}` is reserved and cannot be used as a variable name")]
    ReservedVariable(String),

    #[error("step #{index} ({name}) is malformed: {reason}")]
    MalformedStep {
        index: usize,
        name: String,
        reason: String,
    },
}

/// Parsed, immutable scenario
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioModel {
    pub id: String,
    pub version: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<Value>,
    pub depends: Vec<String>,
    pub vars: Map<String, Value>,
    pub steps: Vec<Step>,
}

/// One step of a scenario
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    /// Guard template; the step is skipped when it resolves falsy
    pub when: Option<Value>,
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    Call(CallStep),
    /// Variable name -> value template
    Set(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallStep {
    pub target: String,
    pub args: Map<String, Value>,
    pub save_as: Option<String>,
}

impl Step {
    pub fn save_as(&self) -> Option<&str> {
        match &self.action {
            StepAction::Call(call) => call.save_as.as_deref(),
            StepAction::Set(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScenarioDoc {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    trigger: Option<Value>,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    vars: Option<Map<String, Value>>,
    #[serde(default)]
    steps: Vec<StepDoc>,
}

#[derive(Debug, Deserialize)]
struct StepDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    call: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
    #[serde(default)]
    when: Option<Value>,
    #[serde(default)]
    set: Option<Map<String, Value>>,
    #[serde(default)]
    save_as: Option<String>,
}

impl ScenarioModel {
    /// Parse a YAML document; `fallback_id` is used when the document has no id
    pub fn from_yaml_str(
        content: &str,
        fallback_id: Option<&str>,
    ) -> Result<Self, ScenarioParseError> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_value(value, fallback_id)
    }

    pub fn from_json_str(
        content: &str,
        fallback_id: Option<&str>,
    ) -> Result<Self, ScenarioParseError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value, fallback_id)
    }

    pub fn from_value(value: Value, fallback_id: Option<&str>) -> Result<Self, ScenarioParseError> {
        let doc: ScenarioDoc = serde_json::from_value(value)?;

        let id = doc
            .id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| fallback_id.map(str::to_string))
            .ok_or(ScenarioParseError::MissingId)?;

        let version = match doc.version {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => DEFAULT_VERSION.to_string(),
        };

        let vars = doc.vars.unwrap_or_default();
        if vars.contains_key(STEPS_KEY) {
            return Err(ScenarioParseError::ReservedVariable(STEPS_KEY.to_string()));
        }

        let steps = doc
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| parse_step(index, step))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            version,
            name: doc.name,
            description: doc.description,
            trigger: doc.trigger,
            depends: doc.depends,
            vars,
            steps,
        })
    }

    /// Declared dependencies plus every literal skill named by a `skills.run` step
    pub fn skill_dependencies(&self) -> Vec<String> {
        let mut skills = self.depends.clone();
        for step in &self.steps {
            if let StepAction::Call(call) = &step.action {
                if call.target != SKILLS_RUN {
                    continue;
                }
                if let Some(Value::String(skill)) = call.args.get("skill") {
                    if !skill.contains("${") && !skills.contains(skill) {
                        skills.push(skill.clone());
                    }
                }
            }
        }
        skills
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}

fn parse_step(index: usize, doc: StepDoc) -> Result<Step, ScenarioParseError> {
    let name = doc
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("step_{}", index + 1));

    let malformed = |reason: &str| ScenarioParseError::MalformedStep {
        index,
        name: name.clone(),
        reason: reason.to_string(),
    };

    let action = match (doc.call, doc.set) {
        (Some(_), Some(_)) => return Err(malformed("a step cannot both call and set")),
        (None, None) => return Err(malformed("step needs either `call` or `set`")),
        (Some(target), None) => {
            let target = target.trim().to_string();
            if target.is_empty() {
                return Err(malformed("empty call target"));
            }
            StepAction::Call(CallStep {
                target,
                args: doc.args.unwrap_or_default(),
                save_as: doc.save_as.filter(|s| !s.trim().is_empty()),
            })
        }
        (None, Some(set)) => {
            if doc.save_as.is_some() {
                return Err(malformed("`save_as` only applies to call steps"));
            }
            if set.contains_key(STEPS_KEY) {
                return Err(malformed("`steps` is reserved and cannot be assigned"));
            }
            StepAction::Set(set)
        }
    };

    Ok(Step {
        name,
        when: doc.when,
        action,
    })
}

/// Row of the per-workspace scenario install index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioRow {
    pub workspace_id: String,
    pub scenario_id: String,
    pub version: String,
    pub installed_at: DateTime<Utc>,
}
