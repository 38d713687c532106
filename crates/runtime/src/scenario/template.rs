//! `${...}` placeholders inside scenario strings
//!
//! An expression is a dotted path, optionally prefixed with `not `:
//! `${time.result.ok}`, `${not weather.result.ok}`, `${vars.greeting}`.
//! Paths that cannot be parsed or do not resolve produce null.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub negate: bool,
    /// Empty when the expression is malformed
    pub path: Vec<String>,
}

impl Expr {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (negate, body) = match raw.strip_prefix("not ") {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };

        let path: Vec<String> = body.split('.').map(str::to_string).collect();
        let valid = !body.is_empty()
            && path.iter().all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            });

        Self {
            negate,
            path: if valid { path } else { Vec::new() },
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.path.is_empty()
    }

    pub fn evaluate(&self, scope: &Scope<'_>) -> Value {
        let value = if self.is_malformed() {
            Value::Null
        } else {
            scope.lookup(&self.path)
        };
        if self.negate {
            Value::Bool(!is_truthy(&value))
        } else {
            value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Expr(Expr),
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                break;
            };
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            segments.push(Segment::Expr(Expr::parse(&after[..end])));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_placeholders(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Expr(_)))
    }

    /// A lone `${...}` keeps the type of what it resolves to; anything else
    /// renders to a string.
    pub fn render(&self, scope: &Scope<'_>) -> Value {
        if let [Segment::Expr(expr)] = self.segments.as_slice() {
            return expr.evaluate(scope);
        }

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => out.push_str(&to_text(&expr.evaluate(scope))),
            }
        }
        Value::String(out)
    }
}

/// Read-only view over the two lookup roots
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub vars: &'a Map<String, Value>,
    pub steps: &'a Map<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn new(vars: &'a Map<String, Value>, steps: &'a Map<String, Value>) -> Self {
        Self { vars, steps }
    }

    /// `vars.` and `steps.` address a root directly. Bare paths try vars
    /// first and fall back to step entries when the vars walk misses, so a
    /// variable never hides `<save_as>.result.*`.
    pub fn lookup(&self, path: &[String]) -> Value {
        let Some((head, tail)) = path.split_first() else {
            return Value::Null;
        };

        match head.as_str() {
            "vars" if !tail.is_empty() => return walk_map(self.vars, tail),
            "steps" if !tail.is_empty() => return walk_map(self.steps, tail),
            _ => {}
        }

        match walk_map(self.vars, path) {
            Value::Null => walk_map(self.steps, path),
            found => found,
        }
    }
}

fn walk_map(root: &Map<String, Value>, path: &[String]) -> Value {
    let Some((head, tail)) = path.split_first() else {
        return Value::Null;
    };
    let Some(mut current) = root.get(head) else {
        return Value::Null;
    };

    for key in tail {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Null, false, "", 0, empty list and empty map are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Textual form used when a value lands inside a larger string
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Resolve every template string nested in `value`
pub fn resolve_value(value: &Value, scope: &Scope<'_>) -> Value {
    match value {
        Value::String(s) => {
            let template = Template::parse(s);
            if template.has_placeholders() {
                template.render(scope)
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, scope)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Evaluate a `when` guard
pub fn evaluate_condition(condition: &Value, scope: &Scope<'_>) -> bool {
    is_truthy(&resolve_value(condition, scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn maps() -> (Map<String, Value>, Map<String, Value>) {
        let vars = json!({
            "greeting": "Доброе утро!",
            "count": 3,
            "zero": 0,
            "list": ["a", "b"]
        });
        let steps = json!({
            "time": { "result": { "ok": true, "message": "Сейчас 09:00" } },
            "broken": { "result": { "ok": false, "error": "timeout" } }
        });
        (
            vars.as_object().cloned().unwrap(),
            steps.as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn test_parse_segments() {
        let t = Template::parse("a ${x.y} b ${not z}");
        assert_eq!(t.segments().len(), 4);
        assert_eq!(
            t.segments()[1],
            Segment::Expr(Expr {
                negate: false,
                path: vec!["x".to_string(), "y".to_string()]
            })
        );
        assert!(matches!(&t.segments()[3], Segment::Expr(e) if e.negate));

        let unclosed = Template::parse("price ${oops");
        assert!(!unclosed.has_placeholders());
    }

    #[test]
    fn test_single_placeholder_keeps_type() {
        let (vars, steps) = maps();
        let scope = Scope::new(&vars, &steps);

        assert_eq!(Template::parse("${count}").render(&scope), json!(3));
        assert_eq!(Template::parse("${time.result.ok}").render(&scope), json!(true));
        assert_eq!(Template::parse("${not time.result.ok}").render(&scope), json!(false));
        assert_eq!(Template::parse("${list.1}").render(&scope), json!("b"));
    }

    #[test]
    fn test_mixed_text_renders_string() {
        let (vars, steps) = maps();
        let scope = Scope::new(&vars, &steps);

        assert_eq!(
            Template::parse("${vars.greeting} ${time.result.message} x${count}${missing}")
                .render(&scope),
            json!("Доброе утро! Сейчас 09:00 x3")
        );
    }

    #[test]
    fn test_prefixed_roots_and_precedence() {
        let vars = json!({ "time": "from vars" }).as_object().cloned().unwrap();
        let steps = json!({ "time": { "result": 1 } }).as_object().cloned().unwrap();
        let scope = Scope::new(&vars, &steps);

        assert_eq!(Template::parse("${time}").render(&scope), json!("from vars"));
        assert_eq!(Template::parse("${steps.time.result}").render(&scope), json!(1));
        assert_eq!(Template::parse("${vars.time}").render(&scope), json!("from vars"));
    }

    #[test]
    fn test_variable_does_not_hide_step_result() {
        let vars = json!({ "weather": "clear" }).as_object().cloned().unwrap();
        let steps = json!({ "weather": { "result": { "ok": true, "description": "clear" } } })
            .as_object()
            .cloned()
            .unwrap();
        let scope = Scope::new(&vars, &steps);

        assert_eq!(Template::parse("${weather}").render(&scope), json!("clear"));
        assert_eq!(Template::parse("${weather.result.ok}").render(&scope), json!(true));
        assert!(!evaluate_condition(&json!("${not weather.result.ok}"), &scope));
    }

    #[test]
    fn test_malformed_and_missing_are_falsy() {
        let (vars, steps) = maps();
        let scope = Scope::new(&vars, &steps);

        assert_eq!(Template::parse("${}").render(&scope), Value::Null);
        assert_eq!(Template::parse("${a..b}").render(&scope), Value::Null);
        assert_eq!(Template::parse("${a + b}").render(&scope), Value::Null);
        assert!(!evaluate_condition(&json!("${nothing.here}"), &scope));
        assert!(evaluate_condition(&json!("${not nothing.here}"), &scope));
        assert!(evaluate_condition(&json!("${not broken.result.ok}"), &scope));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!("false")));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!([0])));
    }

    #[test]
    fn test_resolve_nested_values() {
        let (vars, steps) = maps();
        let scope = Scope::new(&vars, &steps);

        let args = json!({
            "text": "${time.result.message}",
            "meta": { "n": "${count}", "tags": ["${greeting}", "plain"] },
            "flag": true
        });
        assert_eq!(
            resolve_value(&args, &scope),
            json!({
                "text": "Сейчас 09:00",
                "meta": { "n": 3, "tags": ["Доброе утро!", "plain"] },
                "flag": true
            })
        );
    }
}
