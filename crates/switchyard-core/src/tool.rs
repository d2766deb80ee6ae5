// ABOUTME: Provider-agnostic tool schema types: parameter specs, semantic types, and risk level.
// ABOUTME: Renders a schema into the JSON-schema object that provider adapters send to models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Semantic type of a tool parameter.
///
/// `Path` is sent to models as a string, but tells the run loop the value
/// is a filesystem path that may default to the session's working directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Path,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamType::String | ParamType::Path => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            description: description.to_string(),
        }
    }
}

/// Whether a tool call must pass operator confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Normal,
    HighRisk,
}

/// Name, description, and ordered parameters of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str, params: Vec<ParamSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params,
        }
    }

    /// JSON-schema `object` describing the parameters.
    pub fn parameters_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut prop = json!({
                "type": param.param_type.json_type(),
                "description": param.description,
            });
            if param.param_type == ParamType::Array {
                prop["items"] = json!({ "type": "string" });
            }
            properties.insert(param.name.clone(), prop);
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Parameters whose semantic type is a filesystem path.
    pub fn path_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params
            .iter()
            .filter(|p| p.param_type == ParamType::Path)
    }

    /// Names of required parameters missing from an argument object.
    pub fn missing_required(&self, arguments: &Map<String, Value>) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.required)
            .filter(|p| arguments.get(&p.name).is_none_or(Value::is_null))
            .map(|p| p.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_files_schema() -> ToolSchema {
        ToolSchema::new(
            "list_files",
            "List directory entries.",
            vec![
                ParamSpec::optional("directory_path", ParamType::Path, "Directory to list."),
                ParamSpec::required("pattern", ParamType::String, "Glob pattern."),
            ],
        )
    }

    #[test]
    fn path_params_filters_by_semantic_type() {
        let schema = list_files_schema();
        let names: Vec<&str> = schema.path_params().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["directory_path"]);
    }

    #[test]
    fn missing_required_treats_null_as_missing() {
        let schema = list_files_schema();
        let mut args = Map::new();
        assert_eq!(schema.missing_required(&args), vec!["pattern"]);
        args.insert("pattern".to_string(), Value::Null);
        assert_eq!(schema.missing_required(&args), vec!["pattern"]);
        args.insert("pattern".to_string(), json!("*.rs"));
        assert!(schema.missing_required(&args).is_empty());
    }

    #[test]
    fn array_params_declare_string_items() {
        let schema = ToolSchema::new(
            "t",
            "d",
            vec![ParamSpec::required("items", ParamType::Array, "xs")],
        );
        let params = schema.parameters_json();
        assert_eq!(params["properties"]["items"]["items"]["type"], json!("string"));
    }

    #[test]
    fn risk_defaults_to_normal() {
        assert_eq!(RiskLevel::default(), RiskLevel::Normal);
    }
}
