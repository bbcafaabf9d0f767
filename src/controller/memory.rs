use crate::client::ToolHandler;
use crate::types::ToolDefinition;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub const SET_MEMORY_TOOL: &str = "set_memory";

/// Key/value facts the agent chose to remember about the candidate.
///
/// Cloning shares the underlying map; the tool handler writes into the same
/// store the controller reads from.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

#[derive(Deserialize)]
struct SetMemoryArgs {
    key: String,
    value: String,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// The `set_memory` tool schema and a handler bound to this store.
    pub fn tool(&self) -> (ToolDefinition, Arc<dyn ToolHandler>) {
        let definition = ToolDefinition::function(
            SET_MEMORY_TOOL,
            "Saves important data about the user into memory.",
            json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "The key of the memory value. Always use lowercase and underscores, no other characters."
                    },
                    "value": {
                        "type": "string",
                        "description": "Value can be anything represented as a string"
                    }
                },
                "required": ["key", "value"]
            }),
        );
        let store = self.clone();
        let handler: Arc<dyn ToolHandler> = Arc::new(move |arguments: Value| {
            let store = store.clone();
            async move {
                let args: SetMemoryArgs = serde_json::from_value(arguments)
                    .map_err(|e| format!("Invalid set_memory arguments: {}", e))?;
                info!("[Controller] Memory set: {} = {}", args.key, args.value);
                store.set(args.key, args.value);
                Ok::<_, String>(json!({ "ok": true }))
            }
        });
        (definition, handler)
    }
}
