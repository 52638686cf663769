use async_openai::types::FunctionObject;
use color_eyre::{Result, eyre::eyre};
use serde_json::{Map, Value, json};

use crate::assistant::ToolArguments;

/// リモートのアシスタントから呼び出されるローカル機能。
///
/// `run` は同期呼び出し (ブロッキング I/O 可)。ドライバはブロッキング用スレッド上で呼ぶ。
/// エラーはレジストリ側で結果テキストに変換されるので、ここでは素直に `Err` を返せばよい。
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 引数の JSON Schema
    fn parameters(&self) -> ToolParameters;

    fn run(&self, args: &ToolArguments) -> Result<String>;

    /// OpenAI SDK の `FunctionObject` に変換 (アシスタントへのツール登録用)
    fn function_object(&self) -> FunctionObject {
        FunctionObject {
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
            parameters: Some(self.parameters().into_value()),
            strict: Some(false),
        }
    }
}

/// JSON Schema (object) wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameters(Value);

impl ToolParameters {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Small builder for object-typed parameter schemas.
#[derive(Debug, Default)]
pub struct ToolParametersBuilder {
    properties: Map<String, Value>,
    required: Vec<String>,
    additional_properties: Option<bool>,
}

impl ToolParametersBuilder {
    pub fn new_object() -> Self {
        Self::default()
    }

    pub fn add_string(mut self, name: &str, description: Option<&str>) -> Self {
        let mut prop = json!({ "type": "string" });
        if let Some(d) = description {
            prop["description"] = json!(d);
        }
        self.properties.insert(name.to_string(), prop);
        self
    }

    pub fn add_integer(mut self, name: &str, description: Option<&str>, min: Option<i64>, max: Option<i64>) -> Self {
        let mut prop = json!({ "type": "integer" });
        if let Some(d) = description {
            prop["description"] = json!(d);
        }
        if let Some(m) = min {
            prop["minimum"] = json!(m);
        }
        if let Some(m) = max {
            prop["maximum"] = json!(m);
        }
        self.properties.insert(name.to_string(), prop);
        self
    }

    pub fn add_enum(mut self, name: &str, description: Option<&str>, values: &[&str]) -> Self {
        let mut prop = json!({ "type": "string", "enum": values });
        if let Some(d) = description {
            prop["description"] = json!(d);
        }
        self.properties.insert(name.to_string(), prop);
        self
    }

    pub fn required(mut self, name: &str) -> Self {
        if !self.required.iter().any(|r| r == name) {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = Some(allowed);
        self
    }

    pub fn build(self) -> ToolParameters {
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(self.properties),
            "required": self.required,
        });
        if let Some(allowed) = self.additional_properties {
            schema["additionalProperties"] = json!(allowed);
        }
        ToolParameters(schema)
    }
}

/// 必須の文字列引数を取り出す (空白のみは欠落扱い)
pub fn required_str<'a>(args: &'a ToolArguments, key: &str) -> Result<&'a str> {
    match args.get(key).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(eyre!("'{key}' is required and must be a non-empty string")),
    }
}

/// 任意の文字列引数
pub fn optional_str<'a>(args: &'a ToolArguments, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}
