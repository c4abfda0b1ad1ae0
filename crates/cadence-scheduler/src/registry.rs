use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

/// Arguments handed to a job function for one execution.
#[derive(Debug, Clone)]
pub struct JobCall {
    pub job_id: String,
    pub job_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl JobCall {
    /// Keyword `name` wins over positional `pos`.
    pub fn arg(&self, pos: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(pos))
    }

    pub fn string(&self, pos: usize, name: &str) -> Result<String, JobError> {
        match self.arg(pos, name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(JobError::new(format!(
                "argument '{name}' must be a string, got {other}"
            ))),
            None => Err(JobError::new(format!("missing required argument '{name}'"))),
        }
    }

    pub fn string_or(&self, pos: usize, name: &str, default: &str) -> Result<String, JobError> {
        match self.arg(pos, name) {
            None | Some(Value::Null) => Ok(default.to_string()),
            Some(_) => self.string(pos, name),
        }
    }

    pub fn u64_or(&self, pos: usize, name: &str, default: u64) -> Result<u64, JobError> {
        match self.arg(pos, name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_u64().ok_or_else(|| {
                JobError::new(format!(
                    "argument '{name}' must be a non-negative integer, got {v}"
                ))
            }),
        }
    }
}

/// Failure reported by a job body. Captured into the execution event, never
/// propagated into the scheduler loop.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct JobError {
    pub message: String,
    /// Optional diagnostic detail (stderr, backtrace, ...).
    pub trace: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// A callable the scheduler can invoke by name.
#[async_trait]
pub trait JobFunction: Send + Sync {
    /// One-line summary shown by the management layer.
    fn description(&self) -> &str;

    async fn call(&self, call: JobCall) -> Result<Value, JobError>;
}

/// Adapter turning an async closure into a [`JobFunction`].
pub struct FnJob<F> {
    description: String,
    f: F,
}

pub fn job_fn<F, Fut>(description: impl Into<String>, f: F) -> FnJob<F>
where
    F: Fn(JobCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    FnJob {
        description: description.into(),
        f,
    }
}

#[async_trait]
impl<F, Fut> JobFunction for FnJob<F>
where
    F: Fn(JobCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
{
    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, call: JobCall) -> Result<Value, JobError> {
        (self.f)(call).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
}

/// Name → function table consulted when jobs are added and dispatched.
///
/// Built once at startup and then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct JobRegistry {
    functions: HashMap<String, Arc<dyn JobFunction>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, function: impl JobFunction + 'static) {
        self.register_arc(name, Arc::new(function));
    }

    pub fn register_arc(&mut self, name: impl Into<String>, function: Arc<dyn JobFunction>) {
        let name = name.into();
        info!(function = %name, "job function registered");
        self.functions.insert(name, function);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered functions sorted by name.
    pub fn list(&self) -> Vec<FunctionInfo> {
        let mut out: Vec<FunctionInfo> = self
            .functions
            .iter()
            .map(|(name, f)| FunctionInfo {
                name: name.clone(),
                description: f.description().to_string(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
