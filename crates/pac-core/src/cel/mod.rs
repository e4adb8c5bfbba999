//! # CEL Evaluator
//!
//! The subset of the Common Expression Language used by template
//! annotations (`on-cel-expression`), parameter filters, placeholder
//! lookups on `body`/`headers`/`files` and LLM role filters.
//!
//! Expressions are parsed into an [`ast::Expr`], checked against the set of
//! declared variables and evaluated by a tree-walking interpreter. The
//! member function `"glob".pathChanged()` tests the glob against
//! `files.all`.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::event::{ChangedFiles, Event};

pub mod ast;
mod eval;
mod lexer;
mod parser;

use ast::Expr;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CelError {
    #[error("failed to parse expression: {message}")]
    Parse { message: String },

    #[error("check failed: {message}")]
    Check { message: String },

    #[error("failed to evaluate: {message}")]
    Evaluation { message: String },
}

impl CelError {
    /// Expression errors come from user templates and never go away on retry.
    pub fn is_transient(&self) -> bool {
        false
    }

    pub fn error_category(&self) -> crate::ErrorCategory {
        crate::ErrorCategory::Permanent
    }

    /// Prefix the message with the offending expression.
    fn in_expression(self, source: &str) -> Self {
        let wrap = |message: String| format!("{:?}: {}", source, message);
        match self {
            Self::Parse { message } => Self::Parse {
                message: wrap(message),
            },
            Self::Check { message } => Self::Check {
                message: wrap(message),
            },
            Self::Evaluation { message } => Self::Evaluation {
                message: wrap(message),
            },
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A CEL runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null_type",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Uint(_) => "uint",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Uint(u) => serde_json::Value::from(*u),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Strings render raw; everything else renders as JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Double(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

impl From<&BTreeMap<String, String>> for Value {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}

impl From<&ChangedFiles> for Value {
    fn from(files: &ChangedFiles) -> Self {
        let mut map = BTreeMap::new();
        map.insert("all".to_string(), Value::from(files.all.clone()));
        map.insert("added".to_string(), Value::from(files.added.clone()));
        map.insert("deleted".to_string(), Value::from(files.deleted.clone()));
        map.insert("modified".to_string(), Value::from(files.modified.clone()));
        map.insert("renamed".to_string(), Value::from(files.renamed.clone()));
        Value::Map(map)
    }
}

// ============================================================================
// Activation
// ============================================================================

/// Variables visible to an expression.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    vars: BTreeMap<String, Value>,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }

    /// Variables derived from an event: `event`, `event_type`,
    /// `target_branch`, `source_branch`, `event_title`, `target_url`,
    /// `source_url`, `pull_request_labels`, `body`, `headers` (lowercase
    /// keys) and `files`.
    pub fn for_event(event: &Event, files: &ChangedFiles) -> Self {
        let event_title = if event.trigger_target.is_pull_request() {
            event.pull_request_title.clone()
        } else {
            event.sha_title.clone()
        };
        let headers: BTreeMap<String, Value> = event
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
            .collect();

        Self::new()
            .with("event", event.trigger_target.as_str())
            .with("event_type", event.event_type.as_str())
            .with("target_branch", event.base_branch.as_str())
            .with("source_branch", event.head_branch.as_str())
            .with("event_title", event_title)
            .with("target_url", event.url.as_str())
            .with("source_url", event.head_url.as_str())
            .with("pull_request_labels", event.pull_request_labels.clone())
            .with("body", Value::from(event.payload_json()))
            .with("headers", Value::Map(headers))
            .with("files", files)
    }

    /// Variables for parameter filters and placeholders: `body`, `headers`,
    /// `files`, the parameter map as `pac`, and every name of
    /// [`PARAM_VARIABLES`] bound to its parameter value (empty when unset).
    pub fn for_params(
        event: &Event,
        params: &BTreeMap<String, String>,
        files: &ChangedFiles,
    ) -> Self {
        let headers: BTreeMap<String, Value> = event
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut activation = Self::new()
            .with("body", Value::from(event.payload_json()))
            .with("headers", Value::Map(headers))
            .with("pac", params)
            .with("files", files);
        for name in PARAM_VARIABLES {
            let value = params.get(*name).cloned().unwrap_or_default();
            activation.insert(*name, value);
        }
        activation
    }
}

/// Parameters exposed as top-level variables to parameter expressions.
pub const PARAM_VARIABLES: &[&str] = &[
    "event",
    "event_type",
    "target_branch",
    "source_branch",
    "target_url",
    "source_url",
    "event_title",
    "revision",
    "repo_owner",
    "repo_name",
    "sender",
    "repo_url",
    "git_tag",
    "target_namespace",
    "trigger_comment",
    "pull_request_labels",
    "pull_request_number",
    "git_auth_secret",
];

// ============================================================================
// Programs
// ============================================================================

/// Functions the interpreter implements.
const FUNCTIONS: &[&str] = &[
    "size",
    "contains",
    "startsWith",
    "endsWith",
    "matches",
    "lowerAscii",
    "upperAscii",
    "trim",
    "split",
    "replace",
    "join",
    "string",
    "int",
    "double",
    "pathChanged",
];

/// A parsed and checked expression.
#[derive(Debug, Clone)]
pub struct Program {
    source: String,
    expr: Expr,
}

impl Program {
    /// Parse `source` and reject references to undeclared variables or
    /// unknown functions.
    pub fn compile(source: &str, declared: &[&str]) -> Result<Self, CelError> {
        let expr = parser::parse(source).map_err(|e| e.in_expression(source))?;
        let mut scope: Vec<String> = Vec::new();
        check(&expr, declared, &mut scope).map_err(|e| e.in_expression(source))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, activation: &Activation) -> Result<Value, CelError> {
        eval::Interpreter::new(&activation.vars)
            .eval(&self.expr)
            .map_err(|e| e.in_expression(&self.source))
    }

    /// Evaluate as a predicate; a non-boolean result counts as false.
    pub fn evaluate_bool(&self, activation: &Activation) -> Result<bool, CelError> {
        let value = self.evaluate(activation)?;
        match value.as_bool() {
            Some(b) => Ok(b),
            None => {
                debug!(
                    expression = %self.source,
                    result_type = value.type_name(),
                    "CEL expression did not return a boolean, skipping"
                );
                Ok(false)
            }
        }
    }
}

/// Compile against the activation's variables and evaluate.
pub fn evaluate(source: &str, activation: &Activation) -> Result<Value, CelError> {
    Program::compile(source, &activation.names())?.evaluate(activation)
}

/// Compile against the activation's variables and evaluate as a predicate.
pub fn evaluate_bool(source: &str, activation: &Activation) -> Result<bool, CelError> {
    Program::compile(source, &activation.names())?.evaluate_bool(activation)
}

fn check(expr: &Expr, declared: &[&str], scope: &mut Vec<String>) -> Result<(), CelError> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Ident(name) => {
            if declared.contains(&name.as_str()) || scope.iter().any(|s| s == name) {
                Ok(())
            } else {
                Err(CelError::Check {
                    message: format!("undeclared reference to '{}'", name),
                })
            }
        }
        Expr::Select { operand, .. } | Expr::Has { operand, .. } => {
            check(operand, declared, scope)
        }
        Expr::Index { operand, index } => {
            check(operand, declared, scope)?;
            check(index, declared, scope)
        }
        Expr::Call {
            target,
            function,
            args,
        } => {
            if !FUNCTIONS.contains(&function.as_str()) {
                return Err(CelError::Check {
                    message: format!("undeclared reference to function '{}'", function),
                });
            }
            if let Some(t) = target {
                check(t, declared, scope)?;
            }
            args.iter().try_for_each(|a| check(a, declared, scope))
        }
        Expr::List(items) => items.iter().try_for_each(|i| check(i, declared, scope)),
        Expr::Map(entries) => entries.iter().try_for_each(|(k, v)| {
            check(k, declared, scope)?;
            check(v, declared, scope)
        }),
        Expr::Unary { operand, .. } => check(operand, declared, scope),
        Expr::Binary { left, right, .. } => {
            check(left, declared, scope)?;
            check(right, declared, scope)
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            check(condition, declared, scope)?;
            check(then, declared, scope)?;
            check(otherwise, declared, scope)
        }
        Expr::Comprehension {
            range, var, body, ..
        } => {
            check(range, declared, scope)?;
            scope.push(var.clone());
            let result = check(body, declared, scope);
            scope.pop();
            result
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
