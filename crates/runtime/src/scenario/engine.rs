//! Scenario Engine - sequential step interpreter
//!
//! Responsibilities:
//! - Evaluate `when` guards
//! - Dispatch call steps to registered call targets
//! - Merge `set` results into the variable context
//! - Record call results as `{result: ...}` step entries
//!
//! A failing call never aborts the run; its entry becomes
//! `{result: {ok: false, error}}`. Calling a target that is not registered
//! is an authoring error and aborts before any step runs.

use nodemesh_core::{Event, ScenarioModel, StepAction, SKILLS_RUN, STEPS_KEY};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::template::{Scope, evaluate_condition, resolve_value, to_text};
use super::{Result, ScenarioError};
use crate::bus::EventBus;
use crate::io::{SharedConsole, SharedVoice};
use crate::skills::{InvokeError, SharedSkillInvoker};

pub const IO_CONSOLE_PRINT: &str = "io.console.print";
pub const IO_VOICE_SPEAK: &str = "io.voice.tts.speak";

/// Per-call information handed to targets
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub scenario_id: &'a str,
    pub step: &'a str,
    pub trace_id: &'a str,
}

/// Something a call step can reach
pub trait CallTarget: Send + Sync {
    fn call(&self, args: &Map<String, Value>, ctx: &CallContext<'_>) -> std::result::Result<Value, InvokeError>;
}

/// `skills.run`: `{skill, topic?, payload?}` forwarded to the skill invoker
pub struct SkillsRunTarget {
    invoker: SharedSkillInvoker,
}

impl SkillsRunTarget {
    pub fn new(invoker: SharedSkillInvoker) -> Self {
        Self { invoker }
    }
}

impl CallTarget for SkillsRunTarget {
    fn call(&self, args: &Map<String, Value>, ctx: &CallContext<'_>) -> std::result::Result<Value, InvokeError> {
        let skill = args
            .get("skill")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvokeError::Failed {
                skill: String::new(),
                reason: "missing `skill` argument".to_string(),
            })?;
        let topic = args.get("topic").and_then(Value::as_str).unwrap_or_default();
        let payload = args.get("payload").cloned().unwrap_or_else(|| json!({}));

        debug!(trace_id = %ctx.trace_id, step = %ctx.step, skill = %skill, topic = %topic, "skills.run");
        self.invoker.invoke(skill, topic, &payload)
    }
}

/// `io.console.print`: publishes `ui.notify` so the router decides where the
/// text ends up; prints locally when nothing is subscribed.
pub struct ConsolePrintTarget {
    bus: Arc<EventBus>,
    console: SharedConsole,
    node_id: String,
}

impl ConsolePrintTarget {
    pub fn new(bus: Arc<EventBus>, console: SharedConsole, node_id: impl Into<String>) -> Self {
        Self {
            bus,
            console,
            node_id: node_id.into(),
        }
    }
}

impl CallTarget for ConsolePrintTarget {
    fn call(&self, args: &Map<String, Value>, ctx: &CallContext<'_>) -> std::result::Result<Value, InvokeError> {
        let text = args.get("text").map(to_text).unwrap_or_default();
        let source = format!("scenario:{}", ctx.scenario_id);

        let event = Event::notify(text.clone())
            .with_source(source.clone())
            .with_trace_id(ctx.trace_id);
        if self.bus.publish(&event) == 0 {
            self.console.print(&self.node_id, &text, Some(&source));
        }
        Ok(json!({ "ok": true }))
    }
}

/// `io.voice.tts.speak`: `{text, voice?}`
pub struct VoiceSpeakTarget {
    voice: SharedVoice,
}

impl VoiceSpeakTarget {
    pub fn new(voice: SharedVoice) -> Self {
        Self { voice }
    }
}

impl CallTarget for VoiceSpeakTarget {
    fn call(&self, args: &Map<String, Value>, _ctx: &CallContext<'_>) -> std::result::Result<Value, InvokeError> {
        let text = args.get("text").map(to_text).unwrap_or_default();
        let voice = args.get("voice").and_then(Value::as_str);
        self.voice.speak(&text, voice);
        Ok(json!({ "ok": true }))
    }
}

/// Mutable state of one run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub vars: Map<String, Value>,
    pub steps: Map<String, Value>,
    pub trace_id: String,
}

impl ExecutionContext {
    pub fn new(vars: Map<String, Value>) -> Self {
        Self {
            vars,
            steps: Map::new(),
            trace_id: ulid::Ulid::new().to_string(),
        }
    }

    fn record(&mut self, step: &str, save_as: Option<&str>, entry: Value) {
        if let Some(alias) = save_as {
            if alias != step {
                self.steps.insert(alias.to_string(), entry.clone());
            }
        }
        self.steps.insert(step.to_string(), entry);
    }

    /// Variables plus a `steps` key holding every recorded entry. Parsing
    /// rejects `steps` as a variable name, so nothing is overwritten.
    pub fn into_flat(self) -> Map<String, Value> {
        let mut out = self.vars;
        out.insert(STEPS_KEY.to_string(), Value::Object(self.steps));
        out
    }
}

#[derive(Default)]
pub struct ScenarioEngine {
    targets: HashMap<String, Arc<dyn CallTarget>>,
}

impl std::fmt::Debug for ScenarioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.targets.keys().collect();
        names.sort();
        f.debug_struct("ScenarioEngine")
            .field("targets", &names)
            .finish()
    }
}

impl ScenarioEngine {
    /// Engine without any call targets
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine with `skills.run`, `io.console.print` and `io.voice.tts.speak`
    pub fn standard(
        invoker: SharedSkillInvoker,
        bus: Arc<EventBus>,
        console: SharedConsole,
        voice: SharedVoice,
        node_id: impl Into<String>,
    ) -> Self {
        Self::new()
            .with_target(SKILLS_RUN, Arc::new(SkillsRunTarget::new(invoker)))
            .with_target(
                IO_CONSOLE_PRINT,
                Arc::new(ConsolePrintTarget::new(bus, console, node_id)),
            )
            .with_target(IO_VOICE_SPEAK, Arc::new(VoiceSpeakTarget::new(voice)))
    }

    pub fn with_target(mut self, name: impl Into<String>, target: Arc<dyn CallTarget>) -> Self {
        self.register(name, target);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, target: Arc<dyn CallTarget>) {
        self.targets.insert(name.into(), target);
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Check that every call step names a registered target
    pub fn validate(&self, scenario: &ScenarioModel) -> Result<()> {
        for step in &scenario.steps {
            if let StepAction::Call(call) = &step.action {
                if !self.has_target(&call.target) {
                    return Err(ScenarioError::UnknownTarget {
                        step: step.name.clone(),
                        target: call.target.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run every step in order and return the flattened context
    pub fn run(&self, scenario: &ScenarioModel) -> Result<Map<String, Value>> {
        Ok(self.execute(scenario)?.into_flat())
    }

    pub fn execute(&self, scenario: &ScenarioModel) -> Result<ExecutionContext> {
        self.validate(scenario)?;

        let mut ctx = ExecutionContext::new(scenario.vars.clone());
        info!(
            scenario = %scenario.id,
            trace_id = %ctx.trace_id,
            steps = scenario.steps.len(),
            "scenario started"
        );

        for step in &scenario.steps {
            let scope = Scope::new(&ctx.vars, &ctx.steps);
            if let Some(when) = &step.when {
                if !evaluate_condition(when, &scope) {
                    debug!(scenario = %scenario.id, step = %step.name, "step skipped");
                    continue;
                }
            }

            match &step.action {
                StepAction::Call(call) => {
                    let args = match resolve_value(&Value::Object(call.args.clone()), &scope) {
                        Value::Object(map) => map,
                        _ => Map::new(),
                    };
                    let target = self.targets.get(&call.target).ok_or_else(|| {
                        ScenarioError::UnknownTarget {
                            step: step.name.clone(),
                            target: call.target.clone(),
                        }
                    })?;

                    let call_ctx = CallContext {
                        scenario_id: &scenario.id,
                        step: &step.name,
                        trace_id: &ctx.trace_id,
                    };
                    let raw = match target.call(&args, &call_ctx) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(
                                scenario = %scenario.id,
                                step = %step.name,
                                call_target = %call.target,
                                error = %e,
                                "call failed"
                            );
                            json!({ "ok": false, "error": e.to_string() })
                        }
                    };
                    ctx.record(&step.name, call.save_as.as_deref(), json!({ "result": raw }));
                }
                StepAction::Set(assignments) => {
                    let resolved: Vec<(String, Value)> = assignments
                        .iter()
                        .map(|(name, template)| (name.clone(), resolve_value(template, &scope)))
                        .collect();
                    ctx.vars.extend(resolved);
                }
            }
        }

        info!(scenario = %scenario.id, trace_id = %ctx.trace_id, "scenario finished");
        Ok(ctx)
    }
}
