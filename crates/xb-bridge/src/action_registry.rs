use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use ahash::AHashMap;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use xb_harness::platform::{PlatformClient, SearchProduct, TimelineKind};
use xb_harness::signing::SigningContext;

use crate::error::{ActionError, Result};

/// Maximum tweet length after trimming.
pub const MAX_TEXT_CHARS: usize = 280;

pub const DEFAULT_MAX_RESULTS: u32 = 20;
pub const MAX_RESULTS_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// ActionContext: what every handler can reach
// ---------------------------------------------------------------------------

/// Shared collaborators handed to every handler call.
#[derive(Clone)]
pub struct ActionContext {
    pub client: Arc<dyn PlatformClient>,
    pub signing: Arc<SigningContext>,
}

impl ActionContext {
    pub fn new(client: Arc<dyn PlatformClient>, signing: Arc<SigningContext>) -> Self {
        Self { client, signing }
    }
}

// ---------------------------------------------------------------------------
// ActionArgs: typed access to the `args` object
// ---------------------------------------------------------------------------

/// The `args` object of a command, with the argument rules applied on read.
#[derive(Debug, Clone, Default)]
pub struct ActionArgs {
    values: Map<String, Value>,
}

impl ActionArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// The value under `key`, treating JSON null as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    fn required(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| ActionError::MissingArgument(key.to_string()))
    }

    /// A non-empty string. Surrounding whitespace is removed.
    pub fn string(&self, key: &str) -> Result<String> {
        match self.required(key)? {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            Value::String(_) => Err(ActionError::invalid(key, "must not be empty")),
            _ => Err(ActionError::invalid(key, "must be a string")),
        }
    }

    pub fn opt_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(_) => self.string(key).map(Some),
        }
    }

    /// Tweet or message text: trimmed, non-empty, cut to
    /// [`MAX_TEXT_CHARS`] characters.
    pub fn text(&self, key: &str) -> Result<String> {
        let text = self.string(key)?;
        Ok(text.chars().take(MAX_TEXT_CHARS).collect())
    }

    /// An identifier. Numbers are accepted and stringified.
    pub fn id(&self, key: &str) -> Result<String> {
        id_value(key, self.required(key)?)
    }

    /// An array of identifiers.
    pub fn id_list(&self, key: &str) -> Result<Vec<String>> {
        match self.required(key)? {
            Value::Array(items) => items.iter().map(|v| id_value(key, v)).collect(),
            _ => Err(ActionError::invalid(key, "must be an array of ids")),
        }
    }

    /// `maxResults`, clamped to `1..=100`. Absent or non-numeric values
    /// fall back to the default.
    pub fn max_results(&self) -> u32 {
        let requested = match self.get("maxResults") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match requested {
            Some(n) => n.clamp(1, MAX_RESULTS_LIMIT as i64) as u32,
            None => DEFAULT_MAX_RESULTS,
        }
    }

    /// Search `mode`, defaulting to `Top`.
    pub fn search_mode(&self) -> Result<SearchProduct> {
        match self.get("mode") {
            None => Ok(SearchProduct::default()),
            Some(Value::String(s)) => s.parse().map_err(|reason| ActionError::invalid("mode", reason)),
            Some(_) => Err(ActionError::invalid("mode", "must be one of Top, Latest, Media")),
        }
    }

    /// Timeline `tweetType`, defaulting to `Tweets`.
    pub fn timeline_kind(&self) -> Result<TimelineKind> {
        match self.get("tweetType") {
            None => Ok(TimelineKind::Tweets),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|reason| ActionError::invalid("tweetType", reason)),
            Some(_) => Err(ActionError::invalid(
                "tweetType",
                "must be one of Tweets, Replies, Media, Likes",
            )),
        }
    }
}

fn id_value(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ActionError::invalid(key, "must be a non-empty id")),
    }
}

// ---------------------------------------------------------------------------
// ActionHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    async fn call(&self, ctx: ActionContext, args: ActionArgs) -> Result<Value>;
}

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Wraps an async function as an [`ActionHandler`].
pub struct FnActionHandler<F>
where
    F: Fn(ActionContext, ActionArgs) -> ActionFuture + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnActionHandler<F>
where
    F: Fn(ActionContext, ActionArgs) -> ActionFuture + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> ActionHandler for FnActionHandler<F>
where
    F: Fn(ActionContext, ActionArgs) -> ActionFuture + Send + Sync + 'static,
{
    async fn call(&self, ctx: ActionContext, args: ActionArgs) -> Result<Value> {
        (self.f)(ctx, args).await
    }
}

// ---------------------------------------------------------------------------
// ActionDescriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
    pub name: String,
    /// Argument keys that must be present and non-null.
    pub required: Vec<String>,
    /// Whether the action changes state on the platform.
    pub mutating: bool,
    pub description: String,
}

impl ActionDescriptor {
    pub fn new(name: &str, required: &[&str], mutating: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            required: required.iter().map(|k| k.to_string()).collect(),
            mutating,
            description: description.to_string(),
        }
    }
}

struct ActionEntry {
    descriptor: ActionDescriptor,
    handler: Arc<dyn ActionHandler>,
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Action name → handler. Populated once at startup, read-only afterwards.
pub struct ActionRegistry {
    actions: AHashMap<String, ActionEntry>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: AHashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ActionDescriptor, handler: Arc<dyn ActionHandler>) {
        let name = descriptor.name.clone();
        self.actions.insert(
            name,
            ActionEntry {
                descriptor,
                handler,
            },
        );
    }

    /// Check required arguments, then run the handler.
    pub async fn dispatch(
        &self,
        name: &str,
        ctx: ActionContext,
        args: ActionArgs,
    ) -> Result<Value> {
        let entry = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;

        if let Some(missing) = entry
            .descriptor
            .required
            .iter()
            .find(|key| args.get(key).is_none())
        {
            return Err(ActionError::MissingArgument(missing.clone()));
        }

        entry.handler.call(ctx, args).await
    }

    pub fn descriptor(&self, name: &str) -> Option<&ActionDescriptor> {
        self.actions.get(name).map(|e| &e.descriptor)
    }

    /// All descriptors, sorted by name.
    pub fn list(&self) -> Vec<&ActionDescriptor> {
        let mut all: Vec<_> = self.actions.values().map(|e| &e.descriptor).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn count(&self) -> usize {
        self.actions.len()
    }

    pub fn has(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
