// Property Schemas
// Tagged representation of the native engine's property schemas and the
// form-data bridge consumed by the settings UI

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Settings;

/// An entry in a list property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub disabled: bool,
}

/// The shape of a single native property. Matched exhaustively wherever
/// a property's value domain matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PropertyKind {
    Number { min: i64, max: i64, step: i64 },
    Float { min: f64, max: f64, step: f64 },
    List { items: Vec<ListItem> },
    Bool,
    Text { multiline: bool },
    Path { filter: String },
}

/// One property of a native handle's schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub name: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(flatten)]
    pub kind: PropertyKind,
    /// Engine-supplied default, if the schema carries one
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// The full property schema of a native handle type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub properties: Vec<Property>,
}

impl PropertySchema {
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Derive default settings from the schema. Explicit defaults win;
    /// otherwise the first valid value of the property's domain is used.
    pub fn defaults(&self) -> Settings {
        let mut settings = Settings::new();

        for prop in &self.properties {
            if let Some(default) = &prop.default {
                settings.insert(prop.name.clone(), default.clone());
                continue;
            }

            let value = match &prop.kind {
                PropertyKind::Number { min, .. } => Value::from(*min),
                PropertyKind::Float { min, .. } => Value::from(*min),
                PropertyKind::List { items } => match items.iter().find(|i| !i.disabled) {
                    Some(item) => item.value.clone(),
                    None => continue,
                },
                PropertyKind::Bool => Value::from(false),
                PropertyKind::Text { .. } => Value::from(""),
                PropertyKind::Path { .. } => Value::from(""),
            };

            settings.insert(prop.name.clone(), value);
        }

        settings
    }
}

/// A single field of the property form exposed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub visible: bool,
    #[serde(flatten)]
    pub kind: PropertyKind,
    pub value: Value,
}

/// Pair a schema with current settings into form data. Settings values win
/// over schema defaults; properties the settings map doesn't mention fall
/// back to the schema's derived default.
pub fn form_data(schema: &PropertySchema, settings: &Settings) -> Vec<FormField> {
    let defaults = schema.defaults();

    schema
        .properties
        .iter()
        .map(|prop| {
            let value = settings
                .get(&prop.name)
                .or_else(|| defaults.get(&prop.name))
                .cloned()
                .unwrap_or(Value::Null);

            FormField {
                name: prop.name.clone(),
                description: prop.description.clone(),
                enabled: prop.enabled,
                visible: prop.visible,
                kind: prop.kind.clone(),
                value,
            }
        })
        .collect()
}

/// Fold submitted form values back into a settings map
pub fn apply_form_data(fields: &[FormField], settings: &mut Settings) {
    for field in fields {
        settings.insert(field.name.clone(), field.value.clone());
    }
}
