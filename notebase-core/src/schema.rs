use crate::filter::FilterNode;
use crate::value::display_string;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Note,
    File,
    Formula,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaProperty {
    pub key: String,
    pub kind: PropertyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SchemaView {
    pub name: String,
    #[serde(rename = "type")]
    pub view_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Normalized form of a base spec, rebuilt on every request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub base_path: String,
    pub properties: Vec<SchemaProperty>,
    /// Formula key (without the `formula.` prefix) to expression text.
    pub formulas: Map<String, Value>,
    pub views: Vec<SchemaView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterNode>,
}

impl Schema {
    pub fn formula_expression(&self, key: &str) -> Option<&str> {
        self.formulas.get(key).and_then(|v| v.as_str())
    }

    pub fn formula_keys(&self) -> impl Iterator<Item = &String> {
        self.formulas.keys()
    }

    /// Selects a view by name; unknown names fall back to no view.
    pub fn view(&self, name: Option<&str>) -> Option<&SchemaView> {
        match name {
            Some(name) => self.views.iter().find(|view| view.name == name),
            None => self.views.first(),
        }
    }
}

fn meta_string(meta: &Value, keys: &[&str]) -> Option<String> {
    let obj = meta.as_object()?;
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|v| v.as_str().map(|s| s.to_string()))
}

fn property_kind(key: &str) -> PropertyKind {
    if key.trim().is_empty() {
        PropertyKind::Unknown
    } else if key.starts_with("file.") {
        PropertyKind::File
    } else {
        PropertyKind::Note
    }
}

fn extract_properties(spec: &Value) -> Vec<SchemaProperty> {
    let Some(props) = spec.get("properties").and_then(|v| v.as_object()) else {
        return Vec::new();
    };
    props
        .iter()
        .map(|(key, meta)| SchemaProperty {
            key: key.clone(),
            kind: property_kind(key),
            display_name: meta_string(meta, &["displayName", "display_name", "name"]),
            value_type: meta_string(meta, &["type", "valueType", "value_type"]),
        })
        .collect()
}

fn formula_expression_of(value: &Value) -> Option<String> {
    match value {
        Value::String(expr) => Some(expr.clone()),
        Value::Object(_) => meta_string(value, &["expression", "formula", "value"]),
        Value::Null => None,
        other => Some(display_string(Some(other))),
    }
}

fn extract_formulas(spec: &Value, properties: &mut Vec<SchemaProperty>) -> Map<String, Value> {
    let mut formulas = Map::new();
    let Some(entries) = spec.get("formulas").and_then(|v| v.as_object()) else {
        return formulas;
    };
    for (key, value) in entries {
        let Some(expression) = formula_expression_of(value) else {
            continue;
        };
        formulas.insert(key.clone(), Value::String(expression));

        let prop_key = format!("formula.{}", key);
        let display_name = meta_string(value, &["displayName", "display_name", "name"]);
        match properties.iter_mut().find(|p| p.key == prop_key) {
            Some(existing) => {
                existing.kind = PropertyKind::Formula;
                existing.value_type = Some("formula".to_string());
                if display_name.is_some() {
                    existing.display_name = display_name;
                }
            }
            None => properties.push(SchemaProperty {
                key: prop_key,
                kind: PropertyKind::Formula,
                display_name,
                value_type: Some("formula".to_string()),
            }),
        }
    }
    formulas
}

fn order_entry(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Object(obj) => {
            let key = ["property", "column", "key", "field"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))?;
            let descending = ["direction", "dir", "order"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()))
                .map(|d| d.eq_ignore_ascii_case("desc") || d.eq_ignore_ascii_case("descending"))
                .unwrap_or(false);
            Some(if descending {
                format!("-{}", key)
            } else {
                key.to_string()
            })
        }
        other => Some(display_string(Some(other))),
    }
}

fn extract_order(view: &Value) -> Vec<String> {
    match view.get("order").or_else(|| view.get("sort")) {
        Some(Value::Array(items)) => items.iter().filter_map(order_entry).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => order_entry(single).into_iter().collect(),
    }
}

fn extract_views(spec: &Value) -> Vec<SchemaView> {
    let Some(views) = spec.get("views").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    views
        .iter()
        .enumerate()
        .filter(|(_, view)| view.is_object())
        .map(|(index, view)| SchemaView {
            name: view
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("View {}", index + 1)),
            view_type: view
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("table")
                .to_string(),
            limit: view
                .get("limit")
                .and_then(|v| v.as_u64())
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
            order: extract_order(view),
            filters: view
                .get("filters")
                .or_else(|| view.get("filter"))
                .and_then(FilterNode::from_value),
            description: view
                .get("description")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
        })
        .collect()
}

/// Normalizes a decoded base spec. Missing or malformed sections are empty.
pub fn extract_schema(base_path: &str, spec: &Value) -> Schema {
    let mut properties = extract_properties(spec);
    let formulas = extract_formulas(spec, &mut properties);
    Schema {
        base_path: base_path.to_string(),
        properties,
        formulas,
        views: extract_views(spec),
        filters: spec
            .get("filters")
            .or_else(|| spec.get("filter"))
            .and_then(FilterNode::from_value),
    }
}
