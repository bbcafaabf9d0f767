use crate::error::RealtimeError;
use crate::types::ToolDefinition;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Async handler invoked with the parsed arguments of a completed function call.
///
/// `Ok` values are sent back as the call output; `Err` messages are wrapped as
/// `{"error": message}`.
pub trait ToolHandler: Send + Sync {
    fn call(&self, arguments: Value) -> BoxFuture<'static, Result<Value, String>>;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    fn call(&self, arguments: Value) -> BoxFuture<'static, Result<Value, String>> {
        Box::pin(self(arguments))
    }
}

#[derive(Clone)]
pub(crate) struct RegisteredTool {
    pub(crate) definition: ToolDefinition,
    pub(crate) handler: Arc<dyn ToolHandler>,
}

pub(crate) fn register_tool(
    tools: &mut Vec<RegisteredTool>,
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
) -> Result<(), RealtimeError> {
    if definition.name.trim().is_empty() {
        return Err(RealtimeError::InvalidTool(
            "tool name must not be empty".to_string(),
        ));
    }
    if tools.iter().any(|t| t.definition.name == definition.name) {
        return Err(RealtimeError::ToolAlreadyRegistered(definition.name));
    }
    tools.push(RegisteredTool {
        definition,
        handler,
    });
    Ok(())
}

/// Runs the handler registered under `name`, mapping every failure to an
/// `{"error": ...}` output so the agent always gets a reply.
pub(crate) async fn run_tool(tools: &[RegisteredTool], name: &str, arguments: &str) -> Value {
    let Some(tool) = tools.iter().find(|t| t.definition.name == name) else {
        return serde_json::json!({ "error": format!("Tool \"{}\" has not been added", name) });
    };
    let handler = tool.handler.clone();
    let arguments: Value = if arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => {
                return serde_json::json!({ "error": format!("Invalid tool arguments: {}", e) });
            }
        }
    };
    match handler.call(arguments).await {
        Ok(output) => output,
        Err(message) => serde_json::json!({ "error": message }),
    }
}
