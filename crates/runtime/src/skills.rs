//! Skill invocation
//!
//! The scenario engine reaches skills through [`SkillInvoker`]. Calls are
//! synchronous; scenario runs are sequential and never share a context.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::router::TOKEN_HEADER;

pub const TOOLS_CALL_PATH: &str = "/api/tools/call";

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Skill not available: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Skill {skill} failed: {reason}")]
    Failed { skill: String, reason: String },
}

pub trait SkillInvoker: Send + Sync {
    fn invoke(&self, skill: &str, topic: &str, payload: &Value) -> Result<Value, InvokeError>;
}

pub type SharedSkillInvoker = Arc<dyn SkillInvoker>;

/// Wraps a closure; handy for embedding and tests
pub struct FnSkillInvoker<F> {
    f: F,
}

impl<F> FnSkillInvoker<F>
where
    F: Fn(&str, &str, &Value) -> Result<Value, InvokeError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> SkillInvoker for FnSkillInvoker<F>
where
    F: Fn(&str, &str, &Value) -> Result<Value, InvokeError> + Send + Sync,
{
    fn invoke(&self, skill: &str, topic: &str, payload: &Value) -> Result<Value, InvokeError> {
        (self.f)(skill, topic, payload)
    }
}

/// Calls skills hosted behind a node's tools endpoint.
///
/// Uses the blocking reqwest client, so construct and call it outside of an
/// async context (e.g. inside `spawn_blocking`).
#[derive(Debug, Clone)]
pub struct HttpSkillInvoker {
    client: reqwest::blocking::Client,
    endpoint: String,
    token: String,
}

impl HttpSkillInvoker {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, InvokeError> {
        url::Url::parse(base_url)
            .map_err(|e| InvokeError::Http(format!("invalid URL {base_url}: {e}")))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvokeError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), TOOLS_CALL_PATH),
            token: token.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Turn a `{ok, result, error}` envelope into the skill result
pub fn unwrap_tool_response(skill: &str, body: Value) -> Result<Value, InvokeError> {
    let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("skill reported failure")
            .to_string();
        return Err(InvokeError::Failed {
            skill: skill.to_string(),
            reason,
        });
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

impl SkillInvoker for HttpSkillInvoker {
    fn invoke(&self, skill: &str, topic: &str, payload: &Value) -> Result<Value, InvokeError> {
        let body = json!({
            "tool": format!("{skill}:{topic}"),
            "arguments": payload,
        });
        debug!(skill = %skill, topic = %topic, endpoint = %self.endpoint, "invoking skill");

        let response = self
            .client
            .post(&self.endpoint)
            .header(TOKEN_HEADER, &self.token)
            .json(&body)
            .send()
            .map_err(|e| InvokeError::Http(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(InvokeError::NotFound(skill.to_string()));
        }
        if !status.is_success() {
            return Err(InvokeError::Failed {
                skill: skill.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let body: Value = response
            .json()
            .map_err(|e| InvokeError::Http(e.to_string()))?;
        unwrap_tool_response(skill, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_invoker() {
        let invoker = FnSkillInvoker::new(|skill, topic, payload| match skill {
            "echo" => Ok(json!({ "topic": topic, "payload": payload })),
            other => Err(InvokeError::NotFound(other.to_string())),
        });

        let out = invoker.invoke("echo", "say", &json!({ "x": 1 })).unwrap();
        assert_eq!(out["topic"], "say");
        assert!(matches!(
            invoker.invoke("nope", "t", &Value::Null),
            Err(InvokeError::NotFound(_))
        ));
    }

    #[test]
    fn test_unwrap_tool_response() {
        assert_eq!(
            unwrap_tool_response("time", json!({ "ok": true, "result": { "text": "09:00" } }))
                .unwrap(),
            json!({ "text": "09:00" })
        );
        assert_eq!(
            unwrap_tool_response("time", json!({ "ok": true })).unwrap(),
            Value::Null
        );

        let err = unwrap_tool_response("time", json!({ "ok": false, "error": "boom" })).unwrap_err();
        assert_eq!(err.to_string(), "Skill time failed: boom");
    }

    #[test]
    fn test_http_invoker_endpoint() {
        let invoker =
            HttpSkillInvoker::new("http://127.0.0.1:8777/", "t", Duration::from_millis(100)).unwrap();
        assert_eq!(invoker.endpoint(), "http://127.0.0.1:8777/api/tools/call");
        assert!(HttpSkillInvoker::new("::", "t", Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_http_invoker_unreachable() {
        let invoker =
            HttpSkillInvoker::new("http://127.0.0.1:9", "t", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            invoker.invoke("time", "now", &json!({})),
            Err(InvokeError::Http(_))
        ));
    }
}
