use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::protocol::models::Tool;
use crate::session::PendingAction;
use crate::{Error, Result};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> BoxFuture<Result<ToolOutput>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// Session data visible to a handler while it runs.
#[derive(Clone, Debug, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub context: Map<String, Value>,
}

/// What a handler hands back: the model-visible output plus optional
/// side effects applied to the session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolOutput {
    pub output: Value,
    /// Merged into the session context.
    pub context: Option<Map<String, Value>>,
    pub action: Option<PendingAction>,
}

impl ToolOutput {
    #[must_use]
    pub const fn new(output: Value) -> Self {
        Self {
            output,
            context: None,
            action: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, patch: Map<String, Value>) -> Self {
        self.context = Some(patch);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: PendingAction) -> Self {
        self.action = Some(action);
        self
    }
}

impl From<Value> for ToolOutput {
    fn from(output: Value) -> Self {
        Self::new(output)
    }
}

#[derive(Clone)]
pub struct RegisteredTool {
    definition: ToolDefinition,
    handler: ToolHandler,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl RegisteredTool {
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Check `arguments` against the declared schema.
    ///
    /// # Errors
    /// Returns [`Error::ToolValidation`] on a missing required key or a
    /// top-level property of the wrong JSON type.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        validate_arguments(&self.definition.parameters, arguments)
    }

    #[must_use]
    pub fn call(&self, arguments: Value, ctx: ToolContext) -> BoxFuture<Result<ToolOutput>> {
        (self.handler)(arguments, ctx)
    }
}

/// Name → {schema, handler} table consulted when building the session
/// configuration and again when dispatching calls.
///
/// Registering a name twice replaces the earlier entry in place.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.order).finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Register a handler taking typed arguments; the schema is derived
    /// from `TArgs`.
    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.typed(name, None, handler);
    }

    pub fn tool_with_description<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.typed(name, Some(description.into()), handler);
    }

    /// Register a typed handler that sees the session and may return
    /// context updates or a pending action.
    pub fn tool_with_context<TArgs, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    ) where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(TArgs, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        let user_handler = Arc::new(handler);
        self.register(
            name,
            Some(description.into()),
            schema_value::<TArgs>(),
            move |value: Value, ctx: ToolContext| {
                let user_handler = Arc::clone(&user_handler);
                async move {
                    let args: TArgs = decode_arguments(value)?;
                    user_handler(args, ctx).await
                }
            },
        );
    }

    /// Register a handler over raw JSON arguments with an explicit schema.
    pub fn register<F, Fut>(
        &mut self,
        name: &str,
        description: Option<String>,
        parameters: Value,
        handler: F,
    ) where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        let name = name.to_string();
        let handler: ToolHandler = Arc::new(
            move |value: Value, ctx: ToolContext| -> BoxFuture<Result<ToolOutput>> {
                Box::pin(handler(value, ctx))
            },
        );
        let entry = RegisteredTool {
            definition: ToolDefinition {
                name: name.clone(),
                description,
                parameters,
            },
            handler,
        };
        if self.tools.insert(name.clone(), entry).is_some() {
            tracing::debug!(tool = %name, "replacing registered tool");
        } else {
            self.order.push(name);
        }
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    /// Definitions in registration order.
    #[must_use]
    pub fn describe_all(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition.clone())
            .collect()
    }

    /// Definitions in the shape the session configuration expects.
    #[must_use]
    pub fn as_tools(&self) -> Vec<Tool> {
        self.describe_all()
            .into_iter()
            .map(|def| Tool::Function {
                name: def.name,
                description: def.description,
                parameters: def.parameters,
            })
            .collect()
    }

    fn typed<TArgs, TResp, F, Fut>(&mut self, name: &str, description: Option<String>, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let user_handler = Arc::new(handler);
        self.register(
            name,
            description,
            schema_value::<TArgs>(),
            move |value: Value, _ctx: ToolContext| {
                let user_handler = Arc::clone(&user_handler);
                async move {
                    let args: TArgs = decode_arguments(value)?;
                    let resp = user_handler(args).await?;
                    let output = serde_json::to_value(resp)
                        .map_err(|e| Error::ToolExecution(e.to_string()))?;
                    Ok(ToolOutput::new(output))
                }
            },
        );
    }
}

fn schema_value<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
    }
    value
}

#[allow(clippy::result_large_err)]
fn decode_arguments<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::ToolValidation(e.to_string()))
}

/// Shallow structural check: object shape, `required` keys, and the JSON
/// type of top-level properties that declare one.
#[allow(clippy::result_large_err)]
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<()> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };
    let expects_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.contains_key("properties");
    if !expects_object {
        return Ok(());
    }
    let Some(args) = arguments.as_object() else {
        return Err(Error::ToolValidation(format!(
            "expected an object, got {}",
            json_type(arguments)
        )));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(key) {
                return Err(Error::ToolValidation(format!("missing required argument `{key}`")));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, value) in args {
            let Some(declared) = properties.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            let accepted = match declared {
                Value::String(ty) => type_matches(ty, value),
                Value::Array(types) => types
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|ty| type_matches(ty, value)),
                _ => true,
            };
            if !accepted {
                return Err(Error::ToolValidation(format!(
                    "argument `{key}` should be {declared}, got {}",
                    json_type(value)
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
