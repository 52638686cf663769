use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use async_openai::types::FunctionObject;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::assistant::{ToolArguments, ToolCallRequest};

use super::plugin::Plugin;

/// ツール呼び出しを解決・実行した結果。
/// 失敗も panic せず enum で表現し、`output()` でモデルに返すテキストへ変換する。
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResolution {
    /// ツールが存在し、正常実行された
    Executed { name: String, output: String },
    /// ツール名が登録されていなかった
    ToolNotFound { requested: String },
    /// 引数が JSON オブジェクトでなかった
    ArgumentsParseError { name: String, raw: String, error: String },
    /// 実行中に plugin がエラーを返した
    ExecutionError { name: String, error: String },
}

impl ToolResolution {
    pub fn is_executed(&self) -> bool {
        matches!(self, ToolResolution::Executed { .. })
    }

    /// Text submitted back to the remote run. Never empty.
    pub fn output(&self) -> String {
        match self {
            ToolResolution::Executed { output, .. } => output.clone(),
            ToolResolution::ToolNotFound { requested } => {
                format!("An error occurred: function '{requested}' could not be found.")
            }
            ToolResolution::ArgumentsParseError { name, error, .. } => {
                format!("An error occurred: arguments for function '{name}' could not be parsed: {error}")
            }
            ToolResolution::ExecutionError { name, error } => {
                format!("An error occurred while running function '{name}': {error}")
            }
        }
    }
}

impl Display for ToolResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolResolution::Executed { name, output } => {
                write!(f, "Executed name={} output(len={})", name, output.len())
            }
            ToolResolution::ToolNotFound { requested } => write!(f, "ToolNotFound requested={}", requested),
            ToolResolution::ArgumentsParseError { name, raw, error } => {
                write!(f, "ArgumentsParseError name={} error={} raw={}", name, error, raw)
            }
            ToolResolution::ExecutionError { name, error } => {
                write!(f, "ExecutionError name={} error={}", name, error)
            }
        }
    }
}

/// Name-keyed set of plugins, assembled once at startup.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn Plugin>>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry").field("plugins", &self.names()).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name. A later registration with the same
    /// name replaces the earlier one.
    pub fn register<P: Plugin + 'static>(&mut self, plugin: P) -> &mut Self {
        self.register_arc(Arc::new(plugin))
    }

    pub fn register_arc(&mut self, plugin: Arc<dyn Plugin>) -> &mut Self {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!(target: "plugins", plugin = %name, "plugin_replaced");
        } else {
            debug!(target: "plugins", plugin = %name, "plugin_registered");
        }
        self
    }

    pub fn with<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Function schemas for every plugin, for registration with the assistant.
    pub fn function_objects(&self) -> Vec<FunctionObject> {
        self.plugins.values().map(|p| p.function_object()).collect()
    }

    /// Run `name` with `args`. Misses and failures come back as descriptive text.
    pub fn run(&self, name: &str, args: &ToolArguments) -> String {
        self.dispatch(name, args).output()
    }

    /// Resolve one tool-call request against the registry and execute it.
    pub fn resolve(&self, request: &ToolCallRequest) -> ToolResolution {
        let name = request.tool_name.as_str();
        if !self.contains(name) {
            warn!(target: "plugins", tool = %name, call_id = %request.call_id, "tool_not_found");
            return ToolResolution::ToolNotFound { requested: name.to_string() };
        }
        match &request.arguments {
            Value::Object(args) => self.dispatch(name, args),
            Value::String(raw) => {
                let error = serde_json::from_str::<Value>(raw)
                    .err()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "expected a JSON object".to_string());
                ToolResolution::ArgumentsParseError { name: name.to_string(), raw: raw.clone(), error }
            }
            other => ToolResolution::ArgumentsParseError {
                name: name.to_string(),
                raw: other.to_string(),
                error: "expected a JSON object".to_string(),
            },
        }
    }

    fn dispatch(&self, name: &str, args: &ToolArguments) -> ToolResolution {
        let Some(plugin) = self.get(name) else {
            warn!(target: "plugins", tool = %name, "tool_not_found");
            return ToolResolution::ToolNotFound { requested: name.to_string() };
        };
        let shown = Value::Object(args.clone());
        trace!(target: "plugins", tool = %name, args = %shown, "tool_call_params");
        match plugin.run(args) {
            Ok(output) => {
                debug!(target: "plugins", tool = %name, len = output.len(), "tool_executed");
                ToolResolution::Executed { name: name.to_string(), output }
            }
            Err(e) => {
                warn!(target: "plugins", tool = %name, error = %e, "tool_execution_failed");
                ToolResolution::ExecutionError { name: name.to_string(), error: e.to_string() }
            }
        }
    }
}
